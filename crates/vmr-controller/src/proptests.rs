//! Property-based tests for vmr-controller

use proptest::prelude::*;

use vmr_core::{InventoryItem, InventorySnapshot};

use crate::config::{CliOverrides, Config};
use crate::output::{OutputFormat, OutputFormatter};

fn output_format_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("table".to_string()),
        Just("json".to_string()),
        Just("quiet".to_string()),
    ]
}

fn relay_url_strategy() -> impl Strategy<Value = String> {
    (
        prop_oneof![Just("ws"), Just("wss")],
        "[a-z]{1,12}(\\.[a-z]{2,6}){0,2}",
        proptest::option::of(1u16..=65535),
    )
        .prop_map(|(scheme, host, port)| match port {
            Some(port) => format!("{scheme}://{host}:{port}"),
            None => format!("{scheme}://{host}"),
        })
}

fn inventory_strategy() -> impl Strategy<Value = InventorySnapshot> {
    prop::collection::btree_map(1u64..10_000, ("[ -~]{0,24}", any::<u64>(), any::<u64>()), 0..12)
        .prop_map(|items| {
            InventorySnapshot::from_items(items.into_iter().map(|(id, (name, price, count))| {
                InventoryItem {
                    id,
                    name,
                    price,
                    count,
                }
            }))
            .unwrap_or_default()
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// CLI output_format override takes precedence over the config file value
    #[test]
    fn test_config_override_output_format(
        config_format in output_format_strategy(),
        cli_format in output_format_strategy()
    ) {
        let mut config = Config::default();
        config.output.format = config_format;

        let result = config.with_overrides(&CliOverrides {
            output_format: Some(cli_format.clone()),
            ..Default::default()
        });
        prop_assert_eq!(result.output.format, cli_format);
    }

    /// Non-empty relay overrides replace the configured list; empty ones keep it
    #[test]
    fn test_config_override_relay_urls(
        config_urls in prop::collection::vec(relay_url_strategy(), 1..4),
        cli_urls in prop::collection::vec(relay_url_strategy(), 0..4)
    ) {
        let mut config = Config::default();
        config.relays.urls = config_urls.clone();

        let result = config.with_overrides(&CliOverrides {
            relay_urls: Some(cli_urls.clone()),
            ..Default::default()
        });
        if cli_urls.is_empty() {
            prop_assert_eq!(result.relays.urls, config_urls);
        } else {
            prop_assert_eq!(result.relays.urls, cli_urls);
        }
    }

    /// Any ws/wss URL list validates
    #[test]
    fn test_websocket_urls_validate(urls in prop::collection::vec(relay_url_strategy(), 1..5)) {
        let mut config = Config::default();
        config.relays.urls = urls;
        prop_assert!(config.validate().is_ok());
    }

    /// Other schemes never validate
    #[test]
    fn test_other_schemes_rejected(
        scheme in prop_oneof![Just("http"), Just("https"), Just("tcp"), Just("file")],
        host in "[a-z]{1,12}"
    ) {
        let mut config = Config::default();
        config.relays.urls = vec![format!("{scheme}://{host}")];
        prop_assert!(config.validate().is_err());
    }

    /// JSON inventory output is always valid JSON listing every item
    #[test]
    fn test_json_inventory_is_valid(snapshot in inventory_strategy()) {
        let out = OutputFormatter::new(OutputFormat::Json, false).format_inventory(&snapshot);
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        prop_assert_eq!(&value["success"], &serde_json::json!(true));
        prop_assert_eq!(&value["data"]["count"], &serde_json::json!(snapshot.len()));
        prop_assert!(chrono::DateTime::parse_from_rfc3339(value["timestamp"].as_str().unwrap()).is_ok());
    }
}
