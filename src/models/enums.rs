use crate::store::StoreError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = StoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(StoreError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(UserRole {
    Patient => "patient",
    Doctor => "doctor",
});

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn role_round_trips_through_str() {
        assert_eq!(UserRole::Patient.as_str(), "patient");
        assert_eq!(UserRole::from_str("doctor").unwrap(), UserRole::Doctor);
    }

    #[test]
    fn unknown_role_is_invalid_enum() {
        let err = UserRole::from_str("admin").unwrap_err();
        match err {
            StoreError::InvalidEnum { field, value } => {
                assert_eq!(field, "UserRole");
                assert_eq!(value, "admin");
            }
            other => panic!("Expected InvalidEnum, got: {other}"),
        }
    }
}
