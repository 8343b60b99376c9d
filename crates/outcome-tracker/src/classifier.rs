use signal_core::{Direction, IntentStatus, OutcomeCategory, PriceWindow, TradeIntent};

/// Label a terminal status with exactly one outcome category.
///
/// `checked` intents split on the sign of the close-to-entry move: any
/// favorable move means the call was right and the target too far, anything
/// else (including a flat close) counts as a wrong call.
pub fn classify(
    status: IntentStatus,
    direction: Direction,
    entry_price: f64,
    window: &PriceWindow,
) -> Option<OutcomeCategory> {
    match status {
        IntentStatus::Completed => Some(OutcomeCategory::Success),
        IntentStatus::Stopped => Some(OutcomeCategory::SlHitEarly),
        IntentStatus::EntryNotReached => Some(OutcomeCategory::EntryNotReached),
        IntentStatus::Checked => {
            if direction.favorable_return(entry_price, window.last_close) > 0.0 {
                Some(OutcomeCategory::TpNotReached)
            } else {
                Some(OutcomeCategory::WrongDirection)
            }
        }
        IntentStatus::Open | IntentStatus::Queued => None,
    }
}

pub struct FailureClassifier;

impl FailureClassifier {
    /// Category of a resolved intent, re-derived from the price window
    /// stored on it. Used for records written before categories were kept.
    pub fn label(intent: &TradeIntent) -> Option<OutcomeCategory> {
        let window = intent.realized.as_ref()?;
        classify(intent.status, intent.direction, intent.entry_price, window)
    }
}
