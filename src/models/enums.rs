use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raised when a string does not name any variant of a `str_enum!` type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid value for {field}: {value}")]
pub struct InvalidEnumValue {
    pub field: String,
    pub value: String,
}

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = InvalidEnumValue;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(InvalidEnumValue {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(
    /// Urgency bucket of a prescription's next dose.
    ReminderStatus {
        Ready => "ready",
        Overdue => "overdue",
        Soon => "soon",
        Upcoming => "upcoming",
        Scheduled => "scheduled",
        Complete => "complete",
    }
);

str_enum!(
    /// Notification permission as reported by the platform
    /// (`default` means the user has not been asked yet).
    PermissionState {
        Granted => "granted",
        Denied => "denied",
        Prompt => "default",
    }
);

str_enum!(
    /// Observable lifecycle of a reminder ticket for one prescription.
    /// Cancelled tickets are dropped, so they read back as `Unscheduled`.
    TicketState {
        Unscheduled => "unscheduled",
        Scheduled => "scheduled",
        Fired => "fired",
    }
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reminder_status_round_trips_through_str() {
        for status in [
            ReminderStatus::Ready,
            ReminderStatus::Overdue,
            ReminderStatus::Soon,
            ReminderStatus::Upcoming,
            ReminderStatus::Scheduled,
            ReminderStatus::Complete,
        ] {
            assert_eq!(status.as_str().parse::<ReminderStatus>().unwrap(), status);
        }
    }

    #[test]
    fn permission_prompt_uses_platform_name() {
        assert_eq!(PermissionState::Prompt.as_str(), "default");
        assert_eq!("default".parse::<PermissionState>().unwrap(), PermissionState::Prompt);
    }

    #[test]
    fn unknown_value_reports_field() {
        let err = "later".parse::<ReminderStatus>().unwrap_err();
        assert_eq!(err.field, "ReminderStatus");
        assert_eq!(err.value, "later");
        assert_eq!(err.to_string(), "Invalid value for ReminderStatus: later");
    }

    #[test]
    fn serializes_as_str_value() {
        let json = serde_json::to_string(&ReminderStatus::Overdue).unwrap();
        assert_eq!(json, "\"overdue\"");
        let json = serde_json::to_string(&PermissionState::Prompt).unwrap();
        assert_eq!(json, "\"default\"");
    }

    #[test]
    fn display_matches_as_str() {
        assert_eq!(ReminderStatus::Soon.to_string(), "soon");
        assert_eq!(PermissionState::Denied.to_string(), "denied");
    }
}
