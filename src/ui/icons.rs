//! Status icons shared by the terminal output.

use console::Emoji;

use crate::workflow::{AssertionStatus, ContestStatus};

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[!]");
pub static PENDING: Emoji<'_, '_> = Emoji("⏳ ", "[..]");
pub static REMOVED: Emoji<'_, '_> = Emoji("🚫 ", "[-]");
pub static ESCALATE: Emoji<'_, '_> = Emoji("🖐️  ", "[HAND]");
pub static SAMPLE: Emoji<'_, '_> = Emoji("🎲 ", "[S]");
pub static REVIEW: Emoji<'_, '_> = Emoji("🔍 ", "[R]");

pub fn contest_icon(status: ContestStatus) -> &'static Emoji<'static, 'static> {
    match status {
        ContestStatus::Proved => &CHECK,
        ContestStatus::InProgress => &PENDING,
        ContestStatus::AuditorRemoved => &REMOVED,
        ContestStatus::LimitReached => &WARN,
        ContestStatus::Disproved | ContestStatus::Unauditable { .. } => &ESCALATE,
    }
}

pub fn assertion_icon(status: AssertionStatus) -> &'static Emoji<'static, 'static> {
    match status {
        AssertionStatus::Proved => &CHECK,
        AssertionStatus::InProgress => &PENDING,
        AssertionStatus::Disproved => &CROSS,
        AssertionStatus::LimitReached => &WARN,
        AssertionStatus::AuditorRemoved => &REMOVED,
    }
}
