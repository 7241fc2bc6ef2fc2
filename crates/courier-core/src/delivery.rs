//! Delivery status transitions for outgoing messages.

use thiserror::Error;

use crate::models::DeliveryStatus;

/// An illegal delivery status change
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("A new message must start in sending, not {proposed}")]
    MustStartWithSending { proposed: &'static str },

    #[error("Delivery status cannot be cleared once set (was {current})")]
    CannotUnset { current: &'static str },

    #[error("Sending progress {progress} is outside 0..=100")]
    ProgressOutOfRange { progress: u8 },

    #[error("Cannot change status from sent to sending")]
    CannotChangeFromSentToSending,

    #[error("Cannot change status from sent to failed")]
    CannotChangeFromSentToFailed,

    #[error("Cannot change status from delivered to {proposed}")]
    CannotChangeFromDelivered { proposed: &'static str },

    #[error("Cannot change status from read")]
    CannotChangeFromRead,
}

/// Check a proposed status against the current one.
///
/// Progress within `Sending` is not required to grow; callers issue
/// proposals in order.
pub fn validate(
    current: Option<&DeliveryStatus>,
    proposed: Option<&DeliveryStatus>,
) -> Result<(), TransitionError> {
    if let Some(DeliveryStatus::Sending { progress }) = proposed {
        if *progress > 100 {
            return Err(TransitionError::ProgressOutOfRange {
                progress: *progress,
            });
        }
    }

    let Some(proposed) = proposed else {
        return match current {
            None => Ok(()),
            Some(current) => Err(TransitionError::CannotUnset {
                current: current.label(),
            }),
        };
    };

    match (current, proposed) {
        (None, DeliveryStatus::Sending { .. })
        | (Some(DeliveryStatus::Sending { .. } | DeliveryStatus::Failed { .. }), _)
        | (
            Some(DeliveryStatus::Sent),
            DeliveryStatus::Sent | DeliveryStatus::Delivered | DeliveryStatus::Read,
        )
        | (Some(DeliveryStatus::Delivered), DeliveryStatus::Delivered | DeliveryStatus::Read) => {
            Ok(())
        }
        (None, proposed) => Err(TransitionError::MustStartWithSending {
            proposed: proposed.label(),
        }),
        (Some(DeliveryStatus::Sent), DeliveryStatus::Sending { .. }) => {
            Err(TransitionError::CannotChangeFromSentToSending)
        }
        (Some(DeliveryStatus::Sent), _) => Err(TransitionError::CannotChangeFromSentToFailed),
        (Some(DeliveryStatus::Delivered), proposed) => {
            Err(TransitionError::CannotChangeFromDelivered {
                proposed: proposed.label(),
            })
        }
        (Some(DeliveryStatus::Read), _) => Err(TransitionError::CannotChangeFromRead),
    }
}
