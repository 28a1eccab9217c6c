//! Reply vocabulary of the coordinator front end

use mas_common::{AccountInfo, ContentId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome message: `OK`, `FAIL: <reason>`, `COMMITTED` or `ABORTED`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    Ok,
    Fail(String),
    Committed,
    Aborted,
}

impl Reply {
    pub fn fail(reason: impl Into<String>) -> Self {
        Reply::Fail(reason.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Reply::Ok | Reply::Committed)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ok => write!(f, "OK"),
            Reply::Fail(reason) => write!(f, "FAIL: {}", reason),
            Reply::Committed => write!(f, "COMMITTED"),
            Reply::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Reply to account requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountReply {
    pub message: Reply,
    pub account: Option<AccountInfo>,
}

impl AccountReply {
    pub fn ok(account: AccountInfo) -> Self {
        Self {
            message: Reply::Ok,
            account: Some(account),
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            message: Reply::fail(reason),
            account: None,
        }
    }
}

/// Reply to payment requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReply {
    pub message: Reply,
    pub payment_id: Option<ContentId>,
}

impl PaymentReply {
    pub fn new(message: Reply, payment_id: ContentId) -> Self {
        Self {
            message,
            payment_id: Some(payment_id),
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            message: Reply::fail(reason),
            payment_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_vocabulary() {
        assert_eq!(Reply::Ok.to_string(), "OK");
        assert_eq!(Reply::Committed.to_string(), "COMMITTED");
        assert_eq!(Reply::Aborted.to_string(), "ABORTED");
        assert_eq!(
            Reply::fail("Cannot Prepare() global transaction").to_string(),
            "FAIL: Cannot Prepare() global transaction"
        );
    }
}
