//! Bucket catalog
//!
//! Fixed table of resource classes: window limit, scope and optional parent.
//! A request names a [`BucketKind`] and, for per-resource kinds, the id of the
//! resource (channel, guild, ...) it targets.

use crate::error::CatalogError;
use chat_common::RateLimitConfig;
use chat_core::Snowflake;
use std::fmt;
use std::time::Duration;

/// Whether a bucket is shared by the whole client or keyed by a resource id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// One bucket for the client lifetime
    Global,
    /// One bucket per resource id, destroyed when idle
    PerResource,
}

/// Resource classes with their own rate limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BucketKind {
    /// Client-wide limit; parent of every other class
    Global,
    /// Opening DM channels
    DirectMessage,
    /// Creating or editing messages in a channel
    SendEditMessage,
    /// Deleting a single message in a channel
    DeleteMessage,
    /// Bulk message deletion in a channel
    DeleteMessages,
    /// Modifying channel name or topic
    ModifyChannel,
    /// Modifying a guild member
    ModifyMember,
    /// Changing the client's own nickname in a guild
    Nickname,
    /// Adding or removing reactions in a channel
    Reaction,
}

impl BucketKind {
    pub const COUNT: usize = 9;

    pub const ALL: [Self; Self::COUNT] = [
        Self::Global,
        Self::DirectMessage,
        Self::SendEditMessage,
        Self::DeleteMessage,
        Self::DeleteMessages,
        Self::ModifyChannel,
        Self::ModifyMember,
        Self::Nickname,
        Self::Reaction,
    ];

    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::DirectMessage => "direct_message",
            Self::SendEditMessage => "send_edit_message",
            Self::DeleteMessage => "delete_message",
            Self::DeleteMessages => "delete_messages",
            Self::ModifyChannel => "modify_channel",
            Self::ModifyMember => "modify_member",
            Self::Nickname => "nickname",
            Self::Reaction => "reaction",
        }
    }

    /// Built-in limit for this class
    #[must_use]
    pub const fn default_spec(self) -> BucketSpec {
        const fn per_resource(max: u32, window: Duration) -> BucketSpec {
            BucketSpec::new(Scope::PerResource, max, window).with_parent(BucketKind::Global)
        }

        match self {
            Self::Global => BucketSpec::new(Scope::Global, 50, Duration::from_secs(1)),
            Self::DirectMessage => per_resource(5, Duration::from_secs(5)),
            Self::SendEditMessage => per_resource(5, Duration::from_secs(5)),
            Self::DeleteMessage => per_resource(5, Duration::from_secs(1)),
            Self::DeleteMessages => per_resource(1, Duration::from_secs(1)),
            Self::ModifyChannel => per_resource(2, Duration::from_secs(600)),
            Self::ModifyMember => per_resource(10, Duration::from_secs(10)),
            Self::Nickname => per_resource(1, Duration::from_secs(1)),
            Self::Reaction => per_resource(1, Duration::from_millis(250)),
        }
    }
}

impl fmt::Display for BucketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Limit definition of one bucket class
///
/// A `max_count` of zero or a zero `window` means the bucket never throttles on
/// its own; it can still be paused by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSpec {
    pub scope: Scope,
    pub max_count: u32,
    pub window: Duration,
    pub parent: Option<BucketKind>,
}

impl BucketSpec {
    #[must_use]
    pub const fn new(scope: Scope, max_count: u32, window: Duration) -> Self {
        Self {
            scope,
            max_count,
            window,
            parent: None,
        }
    }

    #[must_use]
    pub const fn unlimited(scope: Scope) -> Self {
        Self::new(scope, 0, Duration::ZERO)
    }

    #[must_use]
    pub const fn with_parent(mut self, parent: BucketKind) -> Self {
        self.parent = Some(parent);
        self
    }

    #[must_use]
    pub const fn is_unlimited(&self) -> bool {
        self.max_count == 0 || self.window.is_zero()
    }
}

/// Identity of a live bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub kind: BucketKind,
    pub resource: Option<Snowflake>,
}

impl BucketKey {
    #[must_use]
    pub const fn global(kind: BucketKind) -> Self {
        Self {
            kind,
            resource: None,
        }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.resource {
            Some(id) => write!(f, "{}:{}", self.kind, id),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// The table of bucket classes in use
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketCatalog {
    specs: [BucketSpec; BucketKind::COUNT],
}

impl Default for BucketCatalog {
    fn default() -> Self {
        Self {
            specs: BucketKind::ALL.map(BucketKind::default_spec),
        }
    }
}

impl From<&RateLimitConfig> for BucketCatalog {
    fn from(config: &RateLimitConfig) -> Self {
        let mut catalog = Self::default();
        // Global stays parentless and Global-scoped, so the table remains valid
        catalog.specs[BucketKind::Global.index()] = BucketSpec::new(
            Scope::Global,
            config.global_max,
            Duration::from_secs(config.global_window_secs),
        );
        catalog
    }
}

impl BucketCatalog {
    /// Replace the definition of one class
    pub fn with(mut self, kind: BucketKind, spec: BucketSpec) -> Result<Self, CatalogError> {
        self.specs[kind.index()] = spec;
        self.validate()?;
        Ok(self)
    }

    #[must_use]
    pub fn spec(&self, kind: BucketKind) -> &BucketSpec {
        &self.specs[kind.index()]
    }

    /// Key of the bucket serving `kind` for `resource`
    ///
    /// Global classes ignore the resource id.
    #[must_use]
    pub fn key(&self, kind: BucketKind, resource: Option<Snowflake>) -> BucketKey {
        match self.spec(kind).scope {
            Scope::Global => BucketKey::global(kind),
            Scope::PerResource => BucketKey { kind, resource },
        }
    }

    /// Ancestors of `kind`, outermost first, excluding `kind` itself
    #[must_use]
    pub fn ancestors(&self, kind: BucketKind) -> Vec<BucketKind> {
        let mut chain = Vec::new();
        let mut current = self.spec(kind).parent;
        while let Some(parent) = current {
            if chain.len() >= BucketKind::COUNT {
                break;
            }
            chain.push(parent);
            current = self.spec(parent).parent;
        }
        chain.reverse();
        chain
    }

    fn validate(&self) -> Result<(), CatalogError> {
        for kind in BucketKind::ALL {
            let Some(parent) = self.spec(kind).parent else {
                continue;
            };
            if parent == kind {
                return Err(CatalogError::SelfParent(kind.name()));
            }
            if self.spec(parent).scope != Scope::Global {
                return Err(CatalogError::ParentNotGlobal {
                    bucket: kind.name(),
                    parent: parent.name(),
                });
            }

            let mut steps = 0;
            let mut current = Some(parent);
            while let Some(next) = current {
                steps += 1;
                if next == kind || steps > BucketKind::COUNT {
                    return Err(CatalogError::Cycle(kind.name()));
                }
                current = self.spec(next).parent;
            }
        }
        Ok(())
    }
}
