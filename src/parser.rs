// Availability detection for one target date on a reservation listing page

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use tracing::debug;

use crate::{
    config::{ParserConfig, ScanMode, TieBreak},
    document::{decode_page, FlatDocument, HtmlDocument, StructuredDocument},
    error::MonitorError,
    fetcher::FetchedPage,
};

pub const POSITIVE_TOKENS: [&str; 3] = ["空き", "予約可能", "○"];
pub const NEGATIVE_TOKENS: [&str; 2] = ["×", "満室"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Availability {
    Available,
    Unavailable,
    // The run could not reach a conclusion (fetch or decode failed)
    Indeterminate,
}

impl Availability {
    pub fn is_available(self) -> bool {
        self == Availability::Available
    }
}

// `2025-07-26` -> `2025年7月26日`, no zero padding
pub fn format_display_date(date: NaiveDate) -> String {
    format!("{}年{}月{}日", date.year(), date.month(), date.day())
}

#[derive(Debug, Clone, Default)]
pub struct AvailabilityParser {
    config: ParserConfig,
}

impl AvailabilityParser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    // Decodes a fetched page and evaluates it. Only undecodable content errors.
    pub fn parse_page(
        &self,
        page: &FetchedPage,
        target_date: NaiveDate,
    ) -> Result<Availability, MonitorError> {
        let text = decode_page(&page.body, page.content_type.as_deref())?;
        Ok(self.parse(&text, target_date))
    }

    pub fn parse(&self, html: &str, target_date: NaiveDate) -> Availability {
        let needle = format_display_date(target_date);

        // Matches are verbatim text, so a page without the literal string has
        // none. Most runs end here while the date is not yet listed.
        if !html.contains(&needle) {
            debug!(date = %needle, "target date not present on page");
            return Availability::Unavailable;
        }

        match self.config.scan {
            ScanMode::Structured => self.evaluate(&HtmlDocument::parse(html), &needle),
            ScanMode::Window { radius_chars } => {
                self.evaluate(&FlatDocument::windowed(html, radius_chars), &needle)
            }
            ScanMode::WholePage => self.evaluate(&FlatDocument::whole_page(html), &needle),
        }
    }

    // Evaluates every occurrence of `needle` and ORs the results
    pub fn evaluate<D: StructuredDocument>(&self, doc: &D, needle: &str) -> Availability {
        let matches = doc.nodes_containing(needle);
        debug!(date = %needle, matches = matches.len(), "evaluating date occurrences");

        let found = matches.into_iter().enumerate().any(|(i, node)| {
            let context = match doc.parent(node) {
                Some(parent) => doc.text(parent),
                None => doc.text(node),
            };
            let available = self.context_is_available(&context);
            debug!(occurrence = i, available, context = %context.trim(), "date context");
            available
        });

        if found {
            Availability::Available
        } else {
            Availability::Unavailable
        }
    }

    pub fn context_is_available(&self, context: &str) -> bool {
        let positive = POSITIVE_TOKENS.iter().any(|t| context.contains(t));
        match self.config.tie_break {
            // Absence of any negative token counts as availability
            TieBreak::Lenient => {
                positive || !NEGATIVE_TOKENS.iter().any(|t| context.contains(t))
            }
            TieBreak::RequirePositive => positive,
        }
    }
}
