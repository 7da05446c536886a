//! Commands an operator can send to the vending machine.
//!
//! Wire form is adjacently tagged JSON: `{"type": <name>, "data": <payload>}`,
//! with `data` absent for commands that carry nothing.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Command {
    Status,
    AddItem {
        id: u64,
        name: String,
        price: u64,
        count: u64,
    },
    /// Carries the bare item id.
    RemoveItem(u64),
    ChangePrice {
        id: u64,
        price: u64,
    },
    Reboot,
    Shutdown,
    RequestAdminState,
    EndAdminState,
}

impl Command {
    /// The `type` discriminator on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Status => "Status",
            Command::AddItem { .. } => "AddItem",
            Command::RemoveItem(_) => "RemoveItem",
            Command::ChangePrice { .. } => "ChangePrice",
            Command::Reboot => "Reboot",
            Command::Shutdown => "Shutdown",
            Command::RequestAdminState => "RequestAdminState",
            Command::EndAdminState => "EndAdminState",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_unit_commands_have_no_data() {
        for (cmd, name) in [
            (Command::Status, "Status"),
            (Command::Reboot, "Reboot"),
            (Command::Shutdown, "Shutdown"),
            (Command::RequestAdminState, "RequestAdminState"),
            (Command::EndAdminState, "EndAdminState"),
        ] {
            let value = serde_json::to_value(&cmd).unwrap();
            assert_eq!(value, json!({ "type": name }));
            assert_eq!(cmd.name(), name);
        }
    }

    #[test]
    fn test_add_item_wire_form() {
        let cmd = Command::AddItem {
            id: 5,
            name: "Soda".to_string(),
            price: 250,
            count: 10,
        };
        assert_eq!(
            serde_json::to_value(&cmd).unwrap(),
            json!({"type": "AddItem", "data": {"id": 5, "name": "Soda", "price": 250, "count": 10}})
        );
    }

    #[test]
    fn test_remove_item_carries_bare_id() {
        assert_eq!(
            Command::RemoveItem(3).to_json().unwrap(),
            r#"{"type":"RemoveItem","data":3}"#
        );
    }

    #[test]
    fn test_change_price_wire_form() {
        assert_eq!(
            serde_json::to_value(Command::ChangePrice { id: 2, price: 175 }).unwrap(),
            json!({"type": "ChangePrice", "data": {"id": 2, "price": 175}})
        );
    }

    #[test]
    fn test_decoding_rejects_unknown_and_invalid() {
        assert!(Command::from_json(br#"{"type":"End"}"#).is_err());
        assert!(Command::from_json(br#"{"type":"RemoveItem","data":-1}"#).is_err());
        assert!(Command::from_json(br#"{"type":"ChangePrice","data":{"id":1}}"#).is_err());
        assert_eq!(
            Command::from_json(br#"{"type":"Status"}"#).unwrap(),
            Command::Status
        );
    }

    fn any_command() -> impl Strategy<Value = Command> {
        prop_oneof![
            Just(Command::Status),
            (any::<u64>(), ".{0,40}", any::<u64>(), any::<u64>()).prop_map(
                |(id, name, price, count)| Command::AddItem {
                    id,
                    name,
                    price,
                    count
                }
            ),
            any::<u64>().prop_map(Command::RemoveItem),
            (any::<u64>(), any::<u64>()).prop_map(|(id, price)| Command::ChangePrice { id, price }),
            Just(Command::Reboot),
            Just(Command::Shutdown),
            Just(Command::RequestAdminState),
            Just(Command::EndAdminState),
        ]
    }

    proptest! {
        #[test]
        fn prop_encoding_is_total(cmd in any_command()) {
            let json = cmd.to_json().unwrap();
            prop_assert_eq!(Command::from_json(json.as_bytes()).unwrap(), cmd.clone());
            let value: serde_json::Value = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(value["type"].as_str(), Some(cmd.name()));
        }
    }
}
