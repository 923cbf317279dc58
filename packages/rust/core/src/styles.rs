//! Theme styles grouped by channel and priority level.

use std::collections::{BTreeMap, HashMap};

/// Channel rendered before the library/component styles.
pub const CHANNEL_BEFORE: &str = "before";
/// Default channel, rendered after the library/component styles.
pub const CHANNEL_DEFAULT: &str = "";
/// Channel rendered last.
pub const CHANNEL_AFTER: &str = "after";

/// Rendered theme blobs, keyed by channel name then by priority level.
///
/// Levels are integers and render in ascending numeric order; blobs added to
/// the same level keep their insertion order.
#[derive(Debug, Default)]
pub struct StyleChannels {
    channels: HashMap<String, BTreeMap<i32, Vec<String>>>,
}

impl StyleChannels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an already concatenated blob to `channel` at `level`.
    pub fn push(&mut self, channel: &str, level: i32, blob: String) {
        self.channels
            .entry(channel.to_string())
            .or_default()
            .entry(level)
            .or_default()
            .push(blob);
    }

    /// All blobs of `channel`, lowest level first. Unknown channels are empty.
    pub fn render_channel(&self, channel: &str) -> Vec<String> {
        self.channels
            .get(channel)
            .map(|levels| levels.values().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether no theme was ever added.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Channel names in use, sorted.
    pub fn channel_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.channels.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
