//! Announcement text for one listing.
//!
//! Output is German (de-DE): `.` groups thousands, `,` separates decimals, and
//! EUR is written as `€` after the amount. Every field is optional; missing
//! data produces an empty value or a sentinel, never a panic.

use crate::models::{Listing, Price};

/// Shown in place of a price the dealer does not publish.
pub const PRICE_ON_REQUEST: &str = "Preis auf Anfrage";

/// Instagram rejects captions longer than this (in characters).
pub const MAX_CAPTION_CHARS: usize = 2200;

const KW_TO_PS: f64 = 1.359_62;

#[derive(Debug, Clone, Default)]
pub struct CaptionComposer {
    footer: Option<String>,
}

impl CaptionComposer {
    pub fn new(footer: Option<String>) -> Self {
        Self {
            footer: footer.filter(|f| !f.trim().is_empty()),
        }
    }

    pub fn compose(&self, listing: &Listing) -> String {
        let title = listing.title();
        let title = if title.is_empty() {
            "Neu im Bestand".to_string()
        } else {
            title
        };

        let lines = [
            format!("🚗 {}", title),
            String::new(),
            field("💶 Preis", &format_price(listing.price.as_ref())),
            field(
                "📅 Erstzulassung",
                &listing
                    .first_registration
                    .as_deref()
                    .map(format_registration)
                    .unwrap_or_default(),
            ),
            field(
                "🛣️ Kilometerstand",
                &listing
                    .mileage
                    .map(|km| format!("{} km", group_thousands(km)))
                    .unwrap_or_default(),
            ),
            field(
                "⛽ Kraftstoff",
                &listing.fuel.as_deref().map(fuel_label).unwrap_or_default(),
            ),
            field(
                "⚙️ Getriebe",
                &listing
                    .gearbox
                    .as_deref()
                    .map(gearbox_label)
                    .unwrap_or_default(),
            ),
            field(
                "🐎 Leistung",
                &listing.power.map(format_power).unwrap_or_default(),
            ),
        ];

        let mut caption = lines.join("\n");
        if let Some(footer) = &self.footer {
            caption.push_str("\n\n");
            caption.push_str(footer.trim());
        }

        truncate_chars(caption, MAX_CAPTION_CHARS)
    }
}

fn field(label: &str, value: &str) -> String {
    if value.is_empty() {
        format!("{}:", label)
    } else {
        format!("{}: {}", label, value)
    }
}

fn truncate_chars(text: String, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text,
    }
}

/// Display label for an upstream fuel code; unknown codes are echoed.
pub fn fuel_label(code: &str) -> &str {
    match code {
        "PETROL" => "Benzin",
        "DIESEL" => "Diesel",
        "ELECTRICITY" => "Elektro",
        "HYBRID" => "Hybrid (Benzin/Elektro)",
        "HYBRID_DIESEL" => "Hybrid (Diesel/Elektro)",
        "LPG" => "Autogas (LPG)",
        "CNG" => "Erdgas (CNG)",
        "HYDROGENIUM" => "Wasserstoff",
        "ETHANOL" => "Ethanol",
        "OTHER" => "Andere",
        other => other,
    }
}

/// Display label for an upstream gearbox code; unknown codes are echoed.
pub fn gearbox_label(code: &str) -> &str {
    match code {
        "MANUAL_GEAR" => "Schaltgetriebe",
        "AUTOMATIC_GEAR" => "Automatik",
        "SEMIAUTOMATIC_GEAR" => "Halbautomatik",
        other => other,
    }
}

/// `1234567` → `1.234.567`.
pub fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(ch);
    }
    out
}

/// `24990.0` → `24.990`, `9999.5` → `9.999,50`.
pub fn format_amount(value: f64) -> String {
    let cents = (value.abs() * 100.0).round() as u64;
    let (whole, frac) = (cents / 100, cents % 100);
    if frac == 0 {
        group_thousands(whole)
    } else {
        format!("{},{:02}", group_thousands(whole), frac)
    }
}

pub fn format_price(price: Option<&Price>) -> String {
    let Some(price) = price else {
        return PRICE_ON_REQUEST.to_string();
    };
    let Some(amount) = price.amount() else {
        return PRICE_ON_REQUEST.to_string();
    };

    let currency = match price.currency.as_deref().map(str::trim) {
        None | Some("") | Some("EUR") => "€",
        Some(other) => other,
    };
    let mut text = format!("{} {}", format_amount(amount), currency);

    if let (Some(gross), Some(net)) = (price.gross, price.net) {
        if net > 0.0 && net < gross {
            text.push_str(" (MwSt. ausweisbar)");
        }
    }
    text
}

/// `201905`, `2019-05` and `05/2019` all render as `05/2019`.
pub fn format_registration(raw: &str) -> String {
    let raw = raw.trim();
    let digits_only = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());

    if raw.len() == 6 && digits_only(raw) {
        return format!("{}/{}", &raw[4..6], &raw[..4]);
    }
    if let Some((year, month)) = raw.split_once('-') {
        if year.len() == 4 && digits_only(year) && month.len() == 2 && digits_only(month) {
            return format!("{}/{}", month, year);
        }
    }
    raw.to_string()
}

pub fn format_power(kw: u32) -> String {
    let ps = (f64::from(kw) * KW_TO_PS).round() as u64;
    format!("{} kW ({} PS)", group_thousands(u64::from(kw)), group_thousands(ps))
}
