use anyhow::{Context, Result};
use regex::{Captures, Regex};

use crate::model::ExtractedFields;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Consumption,
    PaymentDueDate,
    TrailingYearAvgConsumption,
    DailyAvgConsumption,
    UnitPriceKwh,
    FixedCharge,
}

#[derive(Debug, Clone, Copy)]
enum Normalizer {
    Integer,
    Trimmed,
    Decimal,
}

const RULE_TABLE: [(Field, &str, Normalizer); 6] = [
    (
        Field::Consumption,
        r"TARIFA:T1R1 M CONSUMO:\s*(\d+)",
        Normalizer::Integer,
    ),
    (
        Field::PaymentDueDate,
        r"-- Fecha límite para pago en Entidades:\s*([^.\n]+)",
        Normalizer::Trimmed,
    ),
    (
        Field::TrailingYearAvgConsumption,
        r"Consumo Promedio Último Año:\s*(\d+)",
        Normalizer::Integer,
    ),
    (
        Field::DailyAvgConsumption,
        r"Consumo Promedio Diario:\s*(\d+)",
        Normalizer::Integer,
    ),
    (
        Field::UnitPriceKwh,
        r"CARGO FIJO=Precio Unitario Facturado Cargo Fijo\s*([\d,.]+)",
        Normalizer::Decimal,
    ),
    (
        Field::FixedCharge,
        r"(?m)^Cargo Fijo .*?([\d,.]+)\s*$",
        Normalizer::Decimal,
    ),
];

// issued-on date, period label, due date; matched as one unit on a single line
const BILLING_LINE: &str =
    r"(\d{2}/\d{2}/\d{4})[ \t]+([A-ZÁÉÍÓÚÑ]+[ \t]+\d{4})[ \t]+(\d{2}/\d{2}/\d{4})";

#[derive(Debug)]
struct FieldRule {
    field: Field,
    pattern: Regex,
    normalizer: Normalizer,
}

#[derive(Debug)]
pub struct FieldExtractor {
    rules: Vec<FieldRule>,
    billing_line: Regex,
}

impl FieldExtractor {
    pub fn new() -> Result<Self> {
        let rules = RULE_TABLE
            .iter()
            .map(|(field, pattern, normalizer)| {
                Ok(FieldRule {
                    field: *field,
                    pattern: Regex::new(pattern)
                        .with_context(|| format!("failed to compile {field:?} regex"))?,
                    normalizer: *normalizer,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            rules,
            billing_line: Regex::new(BILLING_LINE)
                .context("failed to compile billing line regex")?,
        })
    }

    pub fn extract(&self, text: &str) -> ExtractedFields {
        let mut fields = ExtractedFields::default();

        for rule in &self.rules {
            let Some(raw) = rule
                .pattern
                .captures(text)
                .and_then(|captures| captures.get(1))
                .map(|m| m.as_str())
            else {
                continue;
            };
            apply(&mut fields, rule.field, rule.normalizer.normalize(raw));
        }

        if let Some(captures) = self.billing_line.captures(text) {
            if let Some((issued_on, period, due_date)) = billing_triple(&captures) {
                fields.issued_on = Some(issued_on);
                fields.period = Some(period);
                fields.due_date = Some(due_date);
            }
        }

        fields
    }
}

fn billing_triple(captures: &Captures<'_>) -> Option<(String, String, String)> {
    let issued_on = captures.get(1)?.as_str().to_string();
    let period = captures
        .get(2)?
        .as_str()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let due_date = captures.get(3)?.as_str().to_string();
    Some((issued_on, period, due_date))
}

enum Value {
    Integer(Option<u64>),
    Text(Option<String>),
}

impl Normalizer {
    fn normalize(self, raw: &str) -> Value {
        match self {
            Normalizer::Integer => Value::Integer(raw.trim().parse::<u64>().ok()),
            Normalizer::Trimmed => {
                Value::Text(Some(raw.trim().to_string()).filter(|value| !value.is_empty()))
            }
            Normalizer::Decimal => Value::Text(normalize_decimal(raw)),
        }
    }
}

fn apply(fields: &mut ExtractedFields, field: Field, value: Value) {
    match (field, value) {
        (Field::Consumption, Value::Integer(value)) => fields.consumption = value,
        (Field::TrailingYearAvgConsumption, Value::Integer(value)) => {
            fields.trailing_year_avg_consumption = value
        }
        (Field::DailyAvgConsumption, Value::Integer(value)) => {
            fields.daily_avg_consumption = value
        }
        (Field::PaymentDueDate, Value::Text(value)) => fields.payment_due_date = value,
        (Field::UnitPriceKwh, Value::Text(value)) => fields.unit_price_kwh = value,
        (Field::FixedCharge, Value::Text(value)) => fields.fixed_charge = value,
        _ => {}
    }
}

/// Comma is the decimal separator in source documents; dots beside a comma are
/// thousands separators.
pub fn normalize_decimal(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches(['.', ',']);
    if !trimmed.chars().any(|ch| ch.is_ascii_digit()) {
        return None;
    }

    let normalized = if trimmed.contains(',') {
        trimmed.replace('.', "").replace(',', ".")
    } else {
        trimmed.to_string()
    };

    normalized.parse::<f64>().ok().map(|_| normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> FieldExtractor {
        FieldExtractor::new().expect("rules should compile")
    }

    #[test]
    fn extracts_reference_invoice_fragment() {
        let text = "\
COOPERATIVA ELECTRICA
TARIFA:T1R1 M CONSUMO: 345
01/02/2024 ENERO 2024 15/02/2024
CARGO FIJO=Precio Unitario Facturado Cargo Fijo 123,45
";
        let fields = extractor().extract(text);

        assert_eq!(fields.consumption, Some(345));
        assert_eq!(fields.issued_on.as_deref(), Some("01/02/2024"));
        assert_eq!(fields.period.as_deref(), Some("ENERO 2024"));
        assert_eq!(fields.due_date.as_deref(), Some("15/02/2024"));
        assert_eq!(fields.unit_price_kwh.as_deref(), Some("123.45"));
        assert!(fields.payment_due_date.is_none());
        assert!(fields.trailing_year_avg_consumption.is_none());
        assert!(fields.daily_avg_consumption.is_none());
        assert!(fields.fixed_charge.is_none());
    }

    #[test]
    fn consumption_alone_leaves_every_other_field_absent() {
        let fields = extractor().extract("TARIFA:T1R1 M CONSUMO:   87");
        assert_eq!(
            fields,
            ExtractedFields {
                consumption: Some(87),
                ..ExtractedFields::default()
            }
        );
    }

    #[test]
    fn empty_and_garbage_text_produce_all_absent_record() {
        assert_eq!(extractor().extract(""), ExtractedFields::default());
        assert_eq!(
            extractor().extract("\u{0}\u{c}%%% Cargo Fijo ... \n"),
            ExtractedFields::default()
        );
    }

    #[test]
    fn extracts_consumption_averages_and_payment_deadline() {
        let text = "\
Consumo Promedio Último Año: 412
Consumo Promedio Diario: 13
-- Fecha límite para pago en Entidades: 20/02/2024. Luego de esa fecha
";
        let fields = extractor().extract(text);
        assert_eq!(fields.trailing_year_avg_consumption, Some(412));
        assert_eq!(fields.daily_avg_consumption, Some(13));
        assert_eq!(fields.payment_due_date.as_deref(), Some("20/02/2024"));
    }

    #[test]
    fn fixed_charge_takes_last_number_of_its_line() {
        let text = "Detalle\nCargo Fijo Mensual T1R1 1 4.512,30\nTotal 99,00\n";
        let fields = extractor().extract(text);
        assert_eq!(fields.fixed_charge.as_deref(), Some("4512.30"));
    }

    #[test]
    fn billing_line_accepts_accented_months_and_is_all_or_nothing() {
        let fields = extractor().extract("05/03/2024  MARZÓ   2024  20/03/2024");
        assert_eq!(fields.period.as_deref(), Some("MARZÓ 2024"));
        assert_eq!(fields.issued_on.as_deref(), Some("05/03/2024"));
        assert_eq!(fields.due_date.as_deref(), Some("20/03/2024"));

        let partial = extractor().extract("05/03/2024 MARZO 2024 sin vencimiento");
        assert!(partial.issued_on.is_none());
        assert!(partial.period.is_none());
        assert!(partial.due_date.is_none());
    }

    #[test]
    fn billing_line_does_not_span_lines() {
        let fields = extractor().extract("05/03/2024\nMARZO 2024\n20/03/2024");
        assert!(fields.period.is_none());
    }

    #[test]
    fn normalize_decimal_handles_separators() {
        assert_eq!(normalize_decimal("123,45").as_deref(), Some("123.45"));
        assert_eq!(normalize_decimal("1.234,5").as_deref(), Some("1234.5"));
        assert_eq!(normalize_decimal("0.1834").as_deref(), Some("0.1834"));
        assert_eq!(normalize_decimal("77,").as_deref(), Some("77"));
        assert_eq!(normalize_decimal(",.,"), None);
        assert_eq!(normalize_decimal(""), None);
    }
}
