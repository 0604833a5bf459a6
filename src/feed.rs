//! RSS Feed Builder
//!
//! Turns qualifying events into an RSS 2.0 document. Item titles come from a pluggable
//! `EventFormatter` so decoration can be swapped out (or fixed in tests) without touching
//! the document structure.

use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::DateTime;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;
use tracing::info;

use crate::processed::{write_atomic, StoreError};
use crate::types::QualifyingEvent;

/// Default feed output file
pub const DEFAULT_FEED_PATH: &str = "vkax_high_value_transactions.xml";

/// Default channel title
pub const DEFAULT_CHANNEL_TITLE: &str = "VKAX Whale Watcher";

/// Default channel link, also the explorer root
pub const DEFAULT_CHANNEL_LINK: &str = "https://explore.vkax.net/";

/// Default channel description
pub const DEFAULT_CHANNEL_DESCRIPTION: &str = "VKAX transactions over 1,000,000";

/// Default currency symbol shown in item descriptions
pub const DEFAULT_UNIT: &str = "VKAX";

/// Phrases used by `PhraseFormatter` when none are supplied
pub const DEFAULT_PHRASES: &[&str] = &[
    "Whale alert",
    "Big splash",
    "Deep pockets",
    "Heavy mover",
    "Whale sighting",
];

/// Errors that can occur while rendering or writing the feed
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("XML rendering error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Feed write error: {0}")]
    Write(#[from] StoreError),
}

/// Strategy for the human-readable item title
pub trait EventFormatter: Send + Sync {
    fn title(&self, event: &QualifyingEvent) -> String;
}

/// `TX abcd...wxyz (2.50M)`
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainFormatter;

impl EventFormatter for PlainFormatter {
    fn title(&self, event: &QualifyingEvent) -> String {
        format!(
            "TX {} ({}M)",
            short_txid(&event.txid),
            format_millions(event.amount)
        )
    }
}

/// Plain title prefixed with a randomly chosen phrase
///
/// Seed it with `with_seed` for reproducible output.
pub struct PhraseFormatter {
    phrases: Vec<String>,
    rng: Mutex<StdRng>,
}

impl PhraseFormatter {
    pub fn new(phrases: Vec<String>, rng: StdRng) -> Self {
        Self {
            phrases,
            rng: Mutex::new(rng),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::new(default_phrases(), StdRng::seed_from_u64(seed))
    }

    pub fn from_entropy() -> Self {
        Self::new(default_phrases(), StdRng::from_entropy())
    }
}

impl EventFormatter for PhraseFormatter {
    fn title(&self, event: &QualifyingEvent) -> String {
        let plain = PlainFormatter.title(event);
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match self.phrases.choose(&mut *rng) {
            Some(phrase) => format!("{}: {}", phrase, plain),
            None => plain,
        }
    }
}

fn default_phrases() -> Vec<String> {
    DEFAULT_PHRASES.iter().map(|p| p.to_string()).collect()
}

/// Fixed channel-level metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMeta {
    pub title: String,
    pub link: String,
    pub description: String,
}

impl Default for ChannelMeta {
    fn default() -> Self {
        Self {
            title: DEFAULT_CHANNEL_TITLE.to_string(),
            link: DEFAULT_CHANNEL_LINK.to_string(),
            description: DEFAULT_CHANNEL_DESCRIPTION.to_string(),
        }
    }
}

/// Everything about the feed that is configuration rather than data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSettings {
    pub channel: ChannelMeta,
    /// Explorer root; item links are `<explorer_url>tx/<txid>`
    pub explorer_url: String,
    /// Currency symbol shown in descriptions
    pub unit: String,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            channel: ChannelMeta::default(),
            explorer_url: DEFAULT_CHANNEL_LINK.to_string(),
            unit: DEFAULT_UNIT.to_string(),
        }
    }
}

impl FeedSettings {
    pub fn tx_link(&self, txid: &str) -> String {
        let base = self.explorer_url.trim_end_matches('/');
        format!("{}/tx/{}", base, txid)
    }
}

/// One feed entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub description: String,
    /// Transaction id, not a permalink
    pub guid: String,
    /// RFC 2822 block time, absent if the timestamp is out of range
    pub pub_date: Option<String>,
}

/// A complete feed: channel metadata plus ordered items
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedDocument {
    pub channel: ChannelMeta,
    pub items: Vec<FeedItem>,
}

impl FeedDocument {
    /// Render as an RSS 2.0 XML document
    pub fn to_xml(&self) -> Result<Vec<u8>, FeedError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

        let mut rss = BytesStart::new("rss");
        rss.push_attribute(("version", "2.0"));
        writer.write_event(Event::Start(rss))?;
        writer.write_event(Event::Start(BytesStart::new("channel")))?;

        write_text_element(&mut writer, "title", &self.channel.title)?;
        write_text_element(&mut writer, "link", &self.channel.link)?;
        write_text_element(&mut writer, "description", &self.channel.description)?;

        for item in &self.items {
            writer.write_event(Event::Start(BytesStart::new("item")))?;
            write_text_element(&mut writer, "title", &item.title)?;
            write_text_element(&mut writer, "link", &item.link)?;
            write_text_element(&mut writer, "description", &item.description)?;

            let mut guid = BytesStart::new("guid");
            guid.push_attribute(("isPermaLink", "false"));
            writer.write_event(Event::Start(guid))?;
            writer.write_event(Event::Text(BytesText::new(&item.guid)))?;
            writer.write_event(Event::End(BytesEnd::new("guid")))?;

            if let Some(pub_date) = &item.pub_date {
                write_text_element(&mut writer, "pubDate", pub_date)?;
            }
            writer.write_event(Event::End(BytesEnd::new("item")))?;
        }

        writer.write_event(Event::End(BytesEnd::new("channel")))?;
        writer.write_event(Event::End(BytesEnd::new("rss")))?;

        let mut xml = writer.into_inner();
        xml.push(b'\n');
        Ok(xml)
    }

    /// Render and replace the file at `path`
    pub fn write_to(&self, path: &Path) -> Result<(), FeedError> {
        let xml = self.to_xml()?;
        write_atomic(path, &xml)?;
        info!("RSS feed with {} items saved to {}", self.items.len(), path.display());
        Ok(())
    }
}

fn write_text_element<W: Write>(
    writer: &mut Writer<W>,
    name: &str,
    text: &str,
) -> Result<(), FeedError> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

/// Builds feed documents from qualifying events
pub struct FeedBuilder {
    settings: FeedSettings,
    formatter: Box<dyn EventFormatter>,
}

impl FeedBuilder {
    pub fn new(settings: FeedSettings, formatter: Box<dyn EventFormatter>) -> Self {
        Self {
            settings,
            formatter,
        }
    }

    pub fn with_plain_titles(settings: FeedSettings) -> Self {
        Self::new(settings, Box::new(PlainFormatter))
    }

    pub fn settings(&self) -> &FeedSettings {
        &self.settings
    }

    /// Build one item per event, preserving event order
    pub fn build(&self, events: &[QualifyingEvent]) -> FeedDocument {
        info!("Creating RSS feed with {} items", events.len());
        FeedDocument {
            channel: self.settings.channel.clone(),
            items: events.iter().map(|event| self.item(event)).collect(),
        }
    }

    fn item(&self, event: &QualifyingEvent) -> FeedItem {
        FeedItem {
            title: self.formatter.title(event),
            link: self.settings.tx_link(&event.txid),
            description: format!(
                "{}M {} at {} UTC",
                format_millions(event.amount),
                self.settings.unit,
                format_block_time(event.block_time)
            ),
            guid: event.txid.clone(),
            pub_date: DateTime::from_timestamp(event.block_time, 0).map(|dt| dt.to_rfc2822()),
        }
    }
}

/// First four and last four characters of a transaction id
///
/// Ids of eight characters or fewer are returned whole.
pub fn short_txid(txid: &str) -> String {
    let chars: Vec<char> = txid.chars().collect();
    if chars.len() <= 8 {
        return txid.to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

/// Amount in millions with exactly two decimal places
pub fn format_millions(amount: Decimal) -> String {
    let mut scaled = (amount / Decimal::from(1_000_000))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    scaled.rescale(2);
    scaled.to_string()
}

/// `YYYY-MM-DD HH:MM` in UTC
pub fn format_block_time(timestamp: i64) -> String {
    match DateTime::from_timestamp(timestamp, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        None => format!("timestamp {}", timestamp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use tempfile::tempdir;

    struct FixedFormatter(&'static str);

    impl EventFormatter for FixedFormatter {
        fn title(&self, _event: &QualifyingEvent) -> String {
            self.0.to_string()
        }
    }

    fn event(txid: &str, amount: &str, block_time: i64) -> QualifyingEvent {
        QualifyingEvent {
            txid: txid.to_string(),
            amount: Decimal::from_str(amount).unwrap(),
            block_time,
        }
    }

    const TXID: &str = "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b";

    // ==================== helper tests ====================

    #[test]
    fn test_short_txid() {
        assert_eq!(short_txid(TXID), "4a5e...a33b");
    }

    #[test]
    fn test_short_txid_keeps_short_ids_whole() {
        assert_eq!(short_txid("abc"), "abc");
        assert_eq!(short_txid("abcdefgh"), "abcdefgh");
        assert_eq!(short_txid("abcdefghi"), "abcd...fghi");
    }

    #[test]
    fn test_format_millions() {
        assert_eq!(format_millions(Decimal::from(2_500_000)), "2.50");
        assert_eq!(format_millions(Decimal::from(1_000_001)), "1.00");
        assert_eq!(format_millions(Decimal::from(12_345_678)), "12.35");
        assert_eq!(format_millions(Decimal::from_str("1005000").unwrap()), "1.01");
    }

    #[test]
    fn test_format_block_time_minute_precision() {
        assert_eq!(format_block_time(1700000000), "2023-11-14 22:13");
        assert_eq!(format_block_time(0), "1970-01-01 00:00");
    }

    #[test]
    fn test_tx_link_joins_without_double_slash() {
        let settings = FeedSettings::default();
        assert_eq!(settings.tx_link("abc"), "https://explore.vkax.net/tx/abc");

        let settings = FeedSettings {
            explorer_url: "https://explorer.example".to_string(),
            ..Default::default()
        };
        assert_eq!(settings.tx_link("abc"), "https://explorer.example/tx/abc");
    }

    // ==================== formatter tests ====================

    #[test]
    fn test_plain_formatter_title() {
        let title = PlainFormatter.title(&event(TXID, "2500000", 1700000000));
        assert_eq!(title, "TX 4a5e...a33b (2.50M)");
    }

    #[test]
    fn test_phrase_formatter_is_reproducible_with_seed() {
        let e = event(TXID, "2500000", 1700000000);
        let a = PhraseFormatter::with_seed(7);
        let b = PhraseFormatter::with_seed(7);

        for _ in 0..5 {
            assert_eq!(a.title(&e), b.title(&e));
        }
    }

    #[test]
    fn test_phrase_formatter_wraps_plain_title() {
        let e = event(TXID, "2500000", 1700000000);
        let title = PhraseFormatter::with_seed(1).title(&e);

        assert!(title.ends_with(": TX 4a5e...a33b (2.50M)"));
        assert!(DEFAULT_PHRASES.iter().any(|p| title.starts_with(p)));
    }

    #[test]
    fn test_phrase_formatter_without_phrases_falls_back() {
        let formatter = PhraseFormatter::new(Vec::new(), StdRng::seed_from_u64(0));
        let e = event(TXID, "2500000", 0);
        assert_eq!(formatter.title(&e), PlainFormatter.title(&e));
    }

    // ==================== FeedBuilder tests ====================

    #[test]
    fn test_build_one_item_per_event_in_order() {
        let builder = FeedBuilder::new(FeedSettings::default(), Box::new(FixedFormatter("fixed")));
        let doc = builder.build(&[
            event("first", "2500000", 1700000000),
            event("first", "3000000", 1700000000),
            event("second", "9000000", 1700000600),
        ]);

        assert_eq!(doc.channel, ChannelMeta::default());
        assert_eq!(doc.items.len(), 3);
        assert_eq!(doc.items[0].title, "fixed");
        assert_eq!(doc.items[0].link, "https://explore.vkax.net/tx/first");
        assert_eq!(doc.items[0].description, "2.50M VKAX at 2023-11-14 22:13 UTC");
        assert_eq!(doc.items[1].description, "3.00M VKAX at 2023-11-14 22:13 UTC");
        assert_eq!(doc.items[2].guid, "second");
        assert_eq!(
            doc.items[0].pub_date.as_deref(),
            Some("Tue, 14 Nov 2023 22:13:20 +0000")
        );
    }

    #[test]
    fn test_build_uses_configured_unit() {
        let settings = FeedSettings {
            unit: "DASH".to_string(),
            ..Default::default()
        };
        let doc = FeedBuilder::with_plain_titles(settings).build(&[event("abc", "2500000", 0)]);
        assert!(doc.items[0].description.starts_with("2.50M DASH at "));
    }

    // ==================== XML tests ====================

    #[test]
    fn test_to_xml_structure() {
        let doc = FeedBuilder::with_plain_titles(FeedSettings::default())
            .build(&[event(TXID, "2500000", 1700000000)]);
        let xml = String::from_utf8(doc.to_xml().unwrap()).unwrap();

        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>"));
        assert!(xml.contains("<rss version=\"2.0\">"));
        assert!(xml.contains("<title>VKAX Whale Watcher</title>"));
        assert!(xml.contains("<link>https://explore.vkax.net/</link>"));
        assert!(xml.contains("<title>TX 4a5e...a33b (2.50M)</title>"));
        assert!(xml.contains(&format!("<link>https://explore.vkax.net/tx/{}</link>", TXID)));
        assert!(xml.contains(&format!("<guid isPermaLink=\"false\">{}</guid>", TXID)));
        assert!(xml.contains("<pubDate>Tue, 14 Nov 2023 22:13:20 +0000</pubDate>"));
        assert_eq!(xml.matches("<item>").count(), 1);
        assert!(xml.trim_end().ends_with("</rss>"));
    }

    #[test]
    fn test_to_xml_escapes_text() {
        let settings = FeedSettings {
            channel: ChannelMeta {
                title: "Whales & <Dolphins>".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let doc = FeedBuilder::with_plain_titles(settings).build(&[event("abc", "2500000", 0)]);
        let xml = String::from_utf8(doc.to_xml().unwrap()).unwrap();

        assert!(xml.contains("Whales &amp; &lt;Dolphins&gt;"));
    }

    #[test]
    fn test_write_to_replaces_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("feed.xml");
        std::fs::write(&path, "old feed").unwrap();

        let doc = FeedBuilder::with_plain_titles(FeedSettings::default())
            .build(&[event("abc", "2500000", 0)]);
        doc.write_to(&path).unwrap();

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written, doc.to_xml().unwrap());
    }

    #[test]
    fn test_write_to_unwritable_path_is_write_error() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("plain-file");
        std::fs::write(&blocker, "x").unwrap();

        let doc = FeedBuilder::with_plain_titles(FeedSettings::default())
            .build(&[event("abc", "2500000", 0)]);
        let result = doc.write_to(&blocker.join("feed.xml"));

        assert!(matches!(result, Err(FeedError::Write(StoreError::Io { .. }))));
    }

    #[test]
    fn test_feed_error_display() {
        let err = FeedError::Write(StoreError::Io {
            path: "/nowhere/feed.xml".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        });
        assert!(err.to_string().contains("/nowhere/feed.xml"));
    }
}
