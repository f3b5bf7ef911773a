//! String-backed enums for the states and roles persisted as text columns.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $label:literal {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = AppError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value.trim() {
                    $($text => Ok($name::$variant),)+
                    other => Err(AppError::bad_request(format!(
                        "invalid {} '{}'. Allowed values: {}",
                        $label,
                        other,
                        [$($text),+].join(", ")
                    ))),
                }
            }
        }
    };
}

text_enum! {
    /// A participant's permission level within one deal.
    DealRole, "deal role" {
        Admin => "admin",
        Seller => "seller",
        Lawyer => "lawyer",
        Buyer => "buyer",
    }
}

text_enum! {
    DealStatus, "deal status" {
        Draft => "draft",
        Active => "active",
        Pending => "pending",
        Completed => "completed",
        Cancelled => "cancelled",
    }
}

text_enum! {
    DocumentStatus, "document status" {
        Draft => "draft",
        Final => "final",
        Signed => "signed",
    }
}

text_enum! {
    MilestoneStatus, "milestone status" {
        NotStarted => "not_started",
        InProgress => "in_progress",
        Completed => "completed",
        Blocked => "blocked",
    }
}

text_enum! {
    /// Status of one signer's record as reported by the e-signature provider.
    SignatureStatus, "signature status" {
        Sent => "sent",
        Delivered => "delivered",
        PartiallyCompleted => "partially_completed",
        Completed => "completed",
        Declined => "declined",
        Voided => "voided",
    }
}

text_enum! {
    /// Aggregate signing state of a milestone.
    SigningState, "signing state" {
        NotStarted => "not_started",
        Sent => "sent",
        PartiallyCompleted => "partially_completed",
        Completed => "completed",
    }
}

text_enum! {
    AnalysisType, "analysis type" {
        SummarizeContract => "summarize_contract",
        KeyClauses => "key_clauses",
        RiskIdentification => "risk_identification",
        LegalCompliance => "legal_compliance",
        ObligationsAnalysis => "obligations_analysis",
        FinancialTerms => "financial_terms",
    }
}

impl DealStatus {
    pub fn is_destructive(&self) -> bool {
        matches!(self, DealStatus::Completed | DealStatus::Cancelled)
    }
}

impl SignatureStatus {
    pub fn counts_as_signed(&self) -> bool {
        matches!(
            self,
            SignatureStatus::Completed | SignatureStatus::PartiallyCompleted
        )
    }
}
