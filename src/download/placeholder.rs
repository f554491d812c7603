//! Date/hour/forecast-run placeholder expansion for URL templates.
//!
//! Source catalogs describe endpoints as templates like
//! `https://model.example.com/{YYYYMMDD}/run{RUN}/surface.grib2`. Expansion
//! substitutes the current UTC values and is a pure string transform — no
//! I/O, no validation.
//!
//! Supported tokens:
//!
//! | Token        | Meaning                                  |
//! |--------------|------------------------------------------|
//! | `{YYYY}`     | 4-digit year                             |
//! | `{YY}`       | 2-digit year                             |
//! | `{MM}`       | 2-digit month                            |
//! | `{DD}`       | 2-digit day of month                     |
//! | `{HH}`       | 2-digit hour                             |
//! | `{YYYYMMDD}` | compact date                             |
//! | `{RUN}`      | most recent synoptic run hour (00/06/12/18) |

use chrono::{DateTime, Datelike, Timelike, Utc};

/// Expands all known tokens against the current UTC time.
///
/// Templates without tokens pass through unchanged.
#[must_use]
pub fn expand_placeholders(template: &str) -> String {
    expand_placeholders_at(template, Utc::now())
}

/// Expands all known tokens against the given instant.
///
/// Pure and deterministic for a fixed `when`; useful for tests and for
/// re-fetching a past model run.
#[must_use]
pub fn expand_placeholders_at(template: &str, when: DateTime<Utc>) -> String {
    if !template.contains('{') {
        return template.to_string();
    }

    let year = when.year();
    let month = when.month();
    let day = when.day();
    let hour = when.hour();

    template
        .replace("{YYYYMMDD}", &format!("{year:04}{month:02}{day:02}"))
        .replace("{YYYY}", &format!("{year:04}"))
        .replace("{YY}", &format!("{:02}", year % 100))
        .replace("{MM}", &format!("{month:02}"))
        .replace("{DD}", &format!("{day:02}"))
        .replace("{HH}", &format!("{hour:02}"))
        .replace("{RUN}", &format!("{:02}", synoptic_run(hour)))
}

/// Most recent synoptic model run hour at or before the given hour.
fn synoptic_run(hour: u32) -> u32 {
    (hour / 6) * 6
}
