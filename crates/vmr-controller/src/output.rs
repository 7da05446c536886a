//! Output formatting for CLI results
//!
//! Supports three output formats:
//! - Table: Human-readable tables (default)
//! - JSON: Structured JSON for scripting and automation
//! - Quiet: Minimal output, exit codes only
//!
//! Also provides the console implementations of the session's
//! notification sink and state store.

use std::str::FromStr;

use comfy_table::{presets::UTF8_FULL, Table};
use serde::Serialize;

use vmr_core::{
    Command, InventoryItem, InventorySnapshot, Notification, NotificationSink, Severity,
    StateStore,
};
use vmr_transport::Ack;

use crate::ExitCode;

/// Output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Quiet,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            "quiet" => Ok(Self::Quiet),
            _ => Err(format!("Unknown output format: {s}")),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Json => write!(f, "json"),
            Self::Quiet => write!(f, "quiet"),
        }
    }
}

/// Standard JSON response wrapper for consistent schema
#[derive(Serialize)]
pub struct JsonResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// ISO 8601 timestamp
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl<T: Serialize> JsonResponse<T> {
    pub fn success_with_command(data: T, command: &str) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: now_rfc3339(),
            command: Some(command.to_string()),
        }
    }
}

impl JsonResponse<()> {
    pub fn error(message: &str) -> JsonResponse<()> {
        JsonResponse {
            success: false,
            data: None,
            error: Some(message.to_string()),
            timestamp: now_rfc3339(),
            command: None,
        }
    }
}

/// Both keys of a login, for display.
#[derive(Debug, Clone, Serialize)]
pub struct KeysInfo {
    pub operator_npub: String,
    pub operator_hex: String,
    /// Only present right after `keys generate`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator_nsec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_npub: Option<String>,
}

/// Formats output for different modes
#[derive(Debug, Clone, Copy)]
pub struct OutputFormatter {
    format: OutputFormat,
    verbose: bool,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat, verbose: bool) -> Self {
        Self { format, verbose }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn is_quiet(&self) -> bool {
        self.format == OutputFormat::Quiet
    }

    /// Format an inventory snapshot
    pub fn format_inventory(&self, snapshot: &InventorySnapshot) -> String {
        match self.format {
            OutputFormat::Table => inventory_table(snapshot),
            OutputFormat::Json => {
                self.to_json_response(&InventoryOutput::from(snapshot), "inventory")
            }
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Format the acknowledgement of a sent command
    pub fn format_ack(&self, ack: &Ack, command: &Command) -> String {
        match self.format {
            OutputFormat::Table => {
                let mut table = Table::new();
                table.load_preset(UTF8_FULL);
                table.set_header(vec!["Property", "Value"]);
                table.add_row(vec!["Command", command.name()]);
                table.add_row(vec!["Relay", &ack.relay_url]);
                table.add_row(vec!["Event ID", &ack.event_id]);
                table.to_string()
            }
            OutputFormat::Json => self.to_json_response(
                &AckOutput {
                    command: command.name(),
                    relay_url: &ack.relay_url,
                    event_id: &ack.event_id,
                },
                command.name(),
            ),
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Format operator/device keys
    pub fn format_keys(&self, keys: &KeysInfo, command: &str) -> String {
        match self.format {
            OutputFormat::Table => {
                let mut table = Table::new();
                table.load_preset(UTF8_FULL);
                table.set_header(vec!["Property", "Value"]);
                table.add_row(vec!["Operator (npub)", &keys.operator_npub]);
                table.add_row(vec!["Operator (hex)", &keys.operator_hex]);
                if let Some(nsec) = &keys.operator_nsec {
                    table.add_row(vec!["Operator secret (nsec)", nsec]);
                }
                if let Some(device) = &keys.device_npub {
                    table.add_row(vec!["Device (npub)", device]);
                }
                table.to_string()
            }
            OutputFormat::Json => self.to_json_response(keys, command),
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Format error with exit code context
    pub fn format_error_with_code(&self, message: &str, code: ExitCode) -> String {
        match self.format {
            OutputFormat::Table => format!("Error: {message}"),
            OutputFormat::Json => {
                let response = JsonResponse::<()>::error(message);
                match serde_json::to_value(&response) {
                    Ok(mut output) => {
                        output["exit_code"] = serde_json::json!(code as i32);
                        output["exit_code_name"] = serde_json::json!(code.name());
                        self.to_json(&output)
                    }
                    Err(e) => format!("{{\"error\": \"{e}\"}}"),
                }
            }
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Progress message (only shown in verbose mode)
    pub fn progress(&self, message: &str) {
        if self.verbose && self.format == OutputFormat::Table {
            eprintln!("... {message}");
        }
    }

    pub fn success(&self, message: &str) {
        if self.format == OutputFormat::Table {
            println!("✓ {message}");
        }
    }

    pub fn error(&self, message: &str) {
        match self.format {
            OutputFormat::Table => eprintln!("✗ {message}"),
            OutputFormat::Json => println!(
                "{}",
                self.to_json(&MessageOutput {
                    level: "error",
                    message,
                    timestamp: now_rfc3339(),
                })
            ),
            OutputFormat::Quiet => {}
        }
    }

    pub fn warning(&self, message: &str) {
        match self.format {
            OutputFormat::Table => eprintln!("⚠ {message}"),
            OutputFormat::Json => println!(
                "{}",
                self.to_json(&MessageOutput {
                    level: "warning",
                    message,
                    timestamp: now_rfc3339(),
                })
            ),
            OutputFormat::Quiet => {}
        }
    }

    /// Info message (only in verbose mode)
    pub fn info(&self, message: &str) {
        if !self.verbose {
            return;
        }
        match self.format {
            OutputFormat::Table => println!("ℹ {message}"),
            OutputFormat::Json => println!(
                "{}",
                self.to_json(&MessageOutput {
                    level: "info",
                    message,
                    timestamp: now_rfc3339(),
                })
            ),
            OutputFormat::Quiet => {}
        }
    }

    fn to_json<T: Serialize>(&self, value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    }

    fn to_json_response<T: Serialize>(&self, value: &T, command: &str) -> String {
        self.to_json(&JsonResponse::success_with_command(value, command))
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Render cents as a currency amount.
fn format_price(minor_units: u64) -> String {
    format!("{}.{:02}", minor_units / 100, minor_units % 100)
}

fn inventory_table(snapshot: &InventorySnapshot) -> String {
    if snapshot.is_empty() {
        return "No items.".to_string();
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["ID", "Name", "Price", "Count"]);
    for item in snapshot.items() {
        table.add_row(vec![
            item.id.to_string(),
            item.name.clone(),
            format_price(item.price),
            item.count.to_string(),
        ]);
    }
    table.to_string()
}

// JSON output structures

#[derive(Serialize)]
struct InventoryOutput<'a> {
    items: Vec<&'a InventoryItem>,
    count: usize,
}

impl<'a> From<&'a InventorySnapshot> for InventoryOutput<'a> {
    fn from(snapshot: &'a InventorySnapshot) -> Self {
        Self {
            items: snapshot.items().collect(),
            count: snapshot.len(),
        }
    }
}

#[derive(Serialize)]
struct AckOutput<'a> {
    command: &'a str,
    relay_url: &'a str,
    event_id: &'a str,
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    level: &'static str,
    message: &'a str,
    timestamp: String,
}

// ============================================================================
// Console collaborators
// ============================================================================

/// Prints session notifications to the terminal.
pub struct ConsoleNotifier {
    formatter: OutputFormatter,
}

impl ConsoleNotifier {
    pub fn new(formatter: OutputFormatter) -> Self {
        Self { formatter }
    }
}

impl NotificationSink for ConsoleNotifier {
    fn notify(&self, notification: Notification) {
        match notification.severity {
            Severity::Info => self.formatter.progress(&notification.message),
            Severity::Success => self.formatter.success(&notification.message),
            Severity::Warning => self.formatter.warning(&notification.message),
            Severity::Error => self.formatter.error(&notification.message),
        }
    }
}

/// Displays reconciled session state.
///
/// Inventory updates are printed only when `show_inventory` is set, so one-shot
/// commands do not dump their optimistic view.
pub struct ConsoleState {
    formatter: OutputFormatter,
    show_inventory: bool,
}

impl ConsoleState {
    pub fn new(formatter: OutputFormatter, show_inventory: bool) -> Self {
        Self {
            formatter,
            show_inventory,
        }
    }
}

impl StateStore for ConsoleState {
    fn set_inventory(&self, snapshot: &InventorySnapshot) {
        if self.show_inventory && !self.formatter.is_quiet() {
            println!("{}", self.formatter.format_inventory(snapshot));
        }
    }

    fn set_connected(&self, connected: bool) {
        tracing::debug!(connected, "connection state changed");
    }
}
