use admin_command::IsMasterReply;

/// Role of a member as reported by its own `isMaster` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRole {
    Primary,
    /// Secondary that is not hidden.
    Secondary,
    /// Hidden secondary.
    Passive,
    Arbiter,
    /// Unreachable, starting up, recovering or in maintenance.
    Other,
}

impl MemberRole {
    pub fn classify(reply: &IsMasterReply) -> Self {
        if reply.arbiter_only {
            Self::Arbiter
        } else if reply.is_master {
            Self::Primary
        } else if reply.secondary && reply.hidden {
            Self::Passive
        } else if reply.secondary {
            Self::Secondary
        } else {
            Self::Other
        }
    }

    /// The member has finished its transition into a steady role.
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Other)
    }
}
