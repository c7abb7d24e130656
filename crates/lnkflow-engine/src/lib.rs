//! lnkflow Engine - Automation rule engine
//!
//! The core of the automation system: trigger matching, schedule
//! computation, action dispatch, rule execution and the periodic
//! sweep. The API crate drives it for manual operations; the server
//! wires the sweep loop and the event gateway.

pub mod dispatch;
pub mod executor;
pub mod gateway;
pub mod matcher;
pub mod schedule;
pub mod sweep;
pub mod validate;

pub use dispatch::{
    ActionDispatcher, ActionOutcome, CampaignControl, NoopCampaignControl, NoopNotifier, Notifier,
    SmtpNotifier,
};
pub use executor::RuleExecutor;
pub use gateway::{EventGateway, TriggeredRule};
pub use sweep::SweepLoop;
pub use validate::validate_rule;
