pub mod canon;
pub mod job_message;
pub mod money;
pub mod outcome;
pub mod run;

pub use canon::payload_hash;
pub use job_message::{JobMessage, JOB_MESSAGE_SCHEMA_VERSION};
pub use money::{Money, MoneyParseError, MICROS_PER_UNIT};
pub use outcome::{ClaimOutcome, RefundOutcome, ReserveOutcome, SettleOutcome};
pub use run::{compute_minimum_fee, FinalizeStage, MoneyState, ReasonCode, Run, RunStatus};
