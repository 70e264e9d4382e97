//! Raise policies
//!
//! Decide whether a received status word surfaces as an error.

use serde::{Deserialize, Serialize};

use crate::apdu::SW_OK;

/// Which responses a backend turns into errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RaisePolicy {
    /// Every response is returned as data
    RaiseNothing,

    /// Anything but `0x9000` is an error
    #[default]
    RaiseAllButSuccess,

    /// Every response is an error
    RaiseAll,
}

impl RaisePolicy {
    /// Whether `status` must be raised under this policy
    pub fn should_raise(self, status: u16) -> bool {
        should_raise(self, status)
    }
}

/// Classify a status word against a policy
pub fn should_raise(policy: RaisePolicy, status: u16) -> bool {
    match policy {
        RaisePolicy::RaiseNothing => false,
        RaisePolicy::RaiseAllButSuccess => status != SW_OK,
        RaisePolicy::RaiseAll => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_policy() {
        assert_eq!(RaisePolicy::default(), RaisePolicy::RaiseAllButSuccess);
        assert!(!RaisePolicy::default().should_raise(0x9000));
        assert!(RaisePolicy::default().should_raise(0x6985));
    }

    proptest! {
        #[test]
        fn test_policy_laws(status in any::<u16>()) {
            prop_assert!(!should_raise(RaisePolicy::RaiseNothing, status));
            prop_assert_eq!(
                should_raise(RaisePolicy::RaiseAllButSuccess, status),
                status != 0x9000
            );
            prop_assert!(should_raise(RaisePolicy::RaiseAll, status));
        }
    }
}
