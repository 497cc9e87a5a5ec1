use common_types::{IdentityMapping, UserId};

/// The four outcomes of an explicit identify, decided from two facts:
/// whether the current user is already identified, and whether the supplied
/// identifier is already mapped.
#[derive(Debug, Clone, PartialEq)]
pub enum IdentifyCase {
    /// The current user is already mapped to exactly this identifier.
    /// Nothing to link; attributes may still be updated.
    IdentifiedSame { user: UserId },
    /// The current user is mapped to a *different* identifier. That lineage
    /// stays untouched; the caller reclassifies as if anonymous.
    IdentifiedOther,
    /// First sighting of this identifier. `user` is the anonymous id to
    /// promote, if the request carried one.
    NeverSeen { user: Option<UserId> },
    /// The identifier already has a canonical user. `orphan` is the
    /// request's own anonymous id, whose history must be merged in.
    KnownIdentifier {
        canonical: UserId,
        orphan: Option<UserId>,
    },
}

/// Pure decision function for the identify state machine.
///
/// `mapping_for_user` is the IdentificationMap row for the request's current
/// user id (if any), `mapping_for_identifier` the row for the supplied
/// identifier. Callers hitting [`IdentifyCase::IdentifiedOther`] call again
/// with `current_user = None`.
pub fn classify(
    identifier: &str,
    current_user: Option<UserId>,
    mapping_for_user: Option<&IdentityMapping>,
    mapping_for_identifier: Option<&IdentityMapping>,
) -> IdentifyCase {
    if let (Some(user), Some(mapping)) = (current_user, mapping_for_user) {
        if mapping.identifier == identifier {
            return IdentifyCase::IdentifiedSame { user };
        }
        return IdentifyCase::IdentifiedOther;
    }

    match mapping_for_identifier {
        None => IdentifyCase::NeverSeen { user: current_user },
        Some(mapping) => IdentifyCase::KnownIdentifier {
            canonical: mapping.user_id,
            orphan: current_user.filter(|user| *user != mapping.user_id),
        },
    }
}
