use crate::address::ServiceAddress;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Membership snapshot of a group conversation. `full_members` and
/// `invited_members` are disjoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembership {
    pub full_members: HashSet<ServiceAddress>,
    pub invited_members: HashSet<ServiceAddress>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Thread {
    Contact { peer: ServiceAddress },
    Group { membership: GroupMembership },
}

impl Thread {
    pub fn is_group(&self) -> bool {
        matches!(self, Thread::Group { .. })
    }
}
