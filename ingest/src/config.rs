use std::net::SocketAddr;

use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "127.0.0.1:3400")]
    pub address: SocketAddr,

    pub redis_url: String,
    pub database_url: String,

    #[envconfig(default = "ingest_jobs")]
    pub queue_table: String,

    /// Session inactivity window, seconds.
    #[envconfig(default = "1800")]
    pub session_window_secs: u64,

    /// Identify lock TTL: the longest a crashed identify can block its
    /// identifier.
    #[envconfig(default = "60")]
    pub identify_lock_secs: u64,

    /// How long the in-process salt cache may lag a rotation.
    #[envconfig(default = "60")]
    pub salt_cache_secs: u64,

    /// Delay on update-user jobs triggered by inline event attributes, so
    /// an in-flight identify's update lands first.
    #[envconfig(default = "2")]
    pub update_user_delay_secs: u64,

    /// Delay on merge jobs, so the canonical user's update lands first and
    /// duplicate triggers collapse in the queue.
    #[envconfig(default = "5")]
    pub merge_delay_secs: u64,

    /// Max-Age for the identity cookie. One year.
    #[envconfig(default = "31536000")]
    pub cookie_max_age_secs: u64,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,
}
