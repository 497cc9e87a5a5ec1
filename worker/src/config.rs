use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    pub database_url: String,

    #[envconfig(default = "ingest_jobs")]
    pub queue_table: String,

    #[envconfig(default = "200")]
    pub poll_interval_ms: u64,

    /// Pure-insert queues can run wide.
    #[envconfig(default = "4")]
    pub event_concurrency: usize,

    #[envconfig(default = "4")]
    pub device_concurrency: usize,

    /// Session inactivity window, seconds. Must match the gateway's; the
    /// merge engine uses it to decide which sessions an event can join.
    #[envconfig(default = "1800")]
    pub session_window_secs: u64,

    /// Salts retained after a rotation: the active pair plus headroom for
    /// operators inspecting a recent rotation.
    #[envconfig(default = "4")]
    pub salt_keep: i64,

    /// How often the scheduler checks whether today's salt rotation has
    /// been enqueued yet.
    #[envconfig(default = "3600")]
    pub salt_check_secs: u64,

    /// Jobs stuck `running` longer than this are returned to the queue.
    #[envconfig(default = "300")]
    pub stall_timeout_secs: u64,

    #[envconfig(default = "60")]
    pub sweep_interval_secs: u64,

    /// How long completed/failed rows are kept for operators before the
    /// sweep deletes them.
    #[envconfig(default = "86400")]
    pub settled_retention_secs: u64,
}
