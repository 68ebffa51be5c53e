use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Chrome started with `--remote-debugging-port=9222`.
pub const DEFAULT_CHROME_URL: &str = "http://127.0.0.1:9222";
pub const DEFAULT_EXPECTED_HOST: &str = "mockup.studio";

const ENV_EXPECTED_HOST: &str = "MOCKUP_PILOT_EXPECTED_HOST";
const ENV_CHROME_URL: &str = "MOCKUP_PILOT_CHROME_URL";
const ENV_LISTEN: &str = "MOCKUP_PILOT_LISTEN";
const ENV_PROFILE: &str = "MOCKUP_PILOT_PROFILE";

/// Process-level settings, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub chrome_url: String,
    pub listen: SocketAddr,
    pub profile: Profile,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mut profile = match std::env::var(ENV_PROFILE) {
            Ok(path) => Profile::load(Path::new(&path))?,
            Err(_) => Profile::default(),
        };
        if let Ok(host) = std::env::var(ENV_EXPECTED_HOST) {
            profile.expected_host = host;
        }

        let chrome_url =
            std::env::var(ENV_CHROME_URL).unwrap_or_else(|_| DEFAULT_CHROME_URL.to_string());

        let listen = match std::env::var(ENV_LISTEN) {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("{ENV_LISTEN} is not a socket address: {raw}"))?,
            Err(_) => SocketAddr::from(([127, 0, 0, 1], 3000)),
        };

        Ok(Self {
            chrome_url,
            listen,
            profile,
        })
    }
}

/// Everything that describes the editor page: where things are, what they
/// are labelled, and how long to wait for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Profile {
    pub expected_host: String,
    pub selectors: Selectors,
    pub labels: Labels,
    pub timings: Timings,
    pub copy_button_style: Decoration,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            expected_host: DEFAULT_EXPECTED_HOST.to_string(),
            selectors: Selectors::default(),
            labels: Labels::default(),
            timings: Timings::default(),
            copy_button_style: Decoration::default(),
        }
    }
}

impl Profile {
    /// Load overrides from a JSON file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open profile {}", path.display()))?;
        let reader = std::io::BufReader::new(file);
        let profile = serde_json::from_reader(reader)
            .with_context(|| format!("Failed to parse profile {}", path.display()))?;
        Ok(profile)
    }

    /// True when `host` is the expected host or one of its subdomains.
    pub fn host_matches(&self, host: &str) -> bool {
        let host = host.trim().to_ascii_lowercase();
        let expected = self.expected_host.trim().to_ascii_lowercase();
        if expected.is_empty() {
            return false;
        }
        host == expected || host.ends_with(&format!(".{expected}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Selectors {
    pub existing_image: String,
    pub start_new: String,
    pub dialog_buttons: String,
    /// Class name (not a selector) marking the dialog's primary action.
    pub primary_action_class: String,
    pub file_input: String,
    pub drop_target: String,
    pub tab_labels: String,
    pub aspect_ratio_trigger: String,
    pub aspect_ratio_options: String,
    pub layout_mode_switches: String,
    pub layout_templates: String,
    pub single_display: String,
    pub drop_slot: String,
    pub slot_placeholder: String,
    pub slot_image: String,
    pub slot_file_input: String,
    pub slot_drop_zone: String,
    pub status_region: String,
    pub copy_button: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            existing_image: "[data-testid='canvas-image'] img".into(),
            start_new: "button[data-action='start-new']".into(),
            dialog_buttons: "[role='dialog'] button".into(),
            primary_action_class: "btn-primary".into(),
            file_input: "input[type='file']".into(),
            drop_target: "[data-dropzone]".into(),
            tab_labels: "[role='tab']".into(),
            aspect_ratio_trigger: "[data-control='aspect-ratio']".into(),
            aspect_ratio_options: "[role='option']".into(),
            layout_mode_switches: "[data-control='layout-mode'] button".into(),
            layout_templates: "[data-layout-template]".into(),
            single_display: "[data-display='single']".into(),
            drop_slot: "[data-drop-slot]".into(),
            slot_placeholder: "[data-placeholder]".into(),
            slot_image: "img".into(),
            slot_file_input: "input[type='file']".into(),
            slot_drop_zone: "[data-dropzone]".into(),
            status_region: "[role='status']".into(),
            copy_button: "button[data-action='copy']".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Labels {
    pub start_over: String,
    pub frame_tab: String,
    pub mockup_tab: String,
    pub aspect_ratio: String,
    pub copied: String,
}

impl Default for Labels {
    fn default() -> Self {
        Self {
            start_over: "Start Over".into(),
            frame_tab: "Frame".into(),
            mockup_tab: "Mockup".into(),
            aspect_ratio: "16:9".into(),
            copied: "Copied to clipboard".into(),
        }
    }
}

/// A bounded poll: check, then sleep `interval_ms`, at most `attempts` checks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollSpec {
    pub interval_ms: u64,
    pub attempts: u32,
}

impl PollSpec {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// All fixed delays, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Timings {
    pub reset_dialog_poll: PollSpec,
    pub reset_clear_poll: PollSpec,
    pub reset_settle_ms: u64,
    pub layout_render_ms: u64,
    pub tab_switch_ms: u64,
    pub aspect_open_ms: u64,
    pub aspect_select_ms: u64,
    pub layout_mode_ms: u64,
    pub template_scroll_ms: u64,
    pub template_click_ms: u64,
    pub template_settle_ms: u64,
    pub slot_upload_ms: u64,
    pub copy_watch_interval_ms: u64,
    pub copy_debounce_ms: u64,
    pub styling_initial_ms: u64,
    pub styling_interval_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            reset_dialog_poll: PollSpec {
                interval_ms: 50,
                attempts: 20,
            },
            reset_clear_poll: PollSpec {
                interval_ms: 50,
                attempts: 60,
            },
            reset_settle_ms: 200,
            layout_render_ms: 800,
            tab_switch_ms: 200,
            aspect_open_ms: 200,
            aspect_select_ms: 150,
            layout_mode_ms: 600,
            template_scroll_ms: 100,
            template_click_ms: 500,
            template_settle_ms: 500,
            slot_upload_ms: 500,
            copy_watch_interval_ms: 300,
            copy_debounce_ms: 3000,
            styling_initial_ms: 1000,
            styling_interval_ms: 3000,
        }
    }
}

/// Inline style and tooltip applied once to an element, tracked by a marker attribute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Decoration {
    pub marker_attribute: String,
    pub css: String,
    pub tooltip: String,
}

impl Default for Decoration {
    fn default() -> Self {
        Self {
            marker_attribute: "data-mockup-pilot".into(),
            css: "outline: 2px solid #6495ed; outline-offset: 2px; border-radius: 6px;".into(),
            tooltip: "Copy the mockup back to the page that opened it".into(),
        }
    }
}
