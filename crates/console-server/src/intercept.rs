//! Authorization interception hook.
//!
//! Every gated delivery (an RPC call, a data refresh, a broadcast) consults
//! the registered interceptors in registration order. The first one that
//! returns `true` vetoes the delivery for that connection.

use async_trait::async_trait;

use crate::connection::Connection;

/// Authorization requirements of a listener, data service or broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessDescriptor {
    /// Minimum authority level. `None` requires nothing.
    pub authority: Option<u32>,
}

impl AccessDescriptor {
    /// A descriptor with no requirement.
    pub const OPEN: Self = Self { authority: None };

    /// Requires at least `authority`.
    pub fn authority(authority: u32) -> Self {
        Self {
            authority: Some(authority),
        }
    }

    /// Required level, with a missing requirement treated as `0`.
    pub fn required_authority(&self) -> u32 {
        self.authority.unwrap_or(0)
    }
}

/// A veto-capable authorization policy.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Returns `true` to veto delivery to `connection`.
    async fn intercept(&self, connection: &Connection, access: &AccessDescriptor) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_requirement_is_zero() {
        assert_eq!(AccessDescriptor::OPEN.required_authority(), 0);
        assert_eq!(AccessDescriptor::default(), AccessDescriptor::OPEN);
        assert_eq!(AccessDescriptor::authority(4).required_authority(), 4);
    }
}
