use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::tokens::LOOP_KEY;
use crate::words::amount_in_words;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum TemplateType {
    Quotation,
    Invoice,
    DeliveryOrder,
}

impl TemplateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateType::Quotation => "quotation",
            TemplateType::Invoice => "invoice",
            TemplateType::DeliveryOrder => "delivery_order",
        }
    }
}

impl std::fmt::Display for TemplateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TemplateType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quotation" => Ok(TemplateType::Quotation),
            "invoice" => Ok(TemplateType::Invoice),
            "delivery_order" => Ok(TemplateType::DeliveryOrder),
            other => Err(anyhow::anyhow!("unknown template type: {other}")),
        }
    }
}

/// JSON body of a preview/generate request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RenderRequest {
    #[serde(rename = "documentData", default)]
    pub document_data: DocumentData,
    #[serde(default)]
    pub customer: Customer,
    #[serde(default)]
    pub items: Vec<LineItem>,
    #[serde(default)]
    pub settings: CompanySettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentData {
    pub quotation_number: Option<String>,
    pub invoice_number: Option<String>,
    pub do_number: Option<String>,
    pub issue_date: Option<String>,
    pub expiry_date: Option<String>,
    pub due_date: Option<String>,
    pub delivery_date: Option<String>,
    pub delivery_address: Option<String>,
    pub project_name: Option<String>,
    pub contact_person: Option<String>,
    pub contact_phone: Option<String>,
    pub validity_days: Option<i64>,
    pub total: Option<f64>,
    pub payment_terms: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Customer {
    pub customer_name: Option<String>,
    pub company_name: Option<String>,
    pub billing_address: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LineItem {
    pub description: Option<String>,
    pub quantity: Option<f64>,
    pub unit_price: Option<f64>,
    pub amount: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompanySettings {
    pub company_name: Option<String>,
    #[serde(rename = "UEN")]
    pub uen: Option<String>,
    pub address: Option<String>,
    pub email: Option<String>,
    pub logo_url: Option<String>,
}

/// The flat runtime mapping used for one render: placeholder name to
/// pre-formatted string value, plus the `items_table` row sequence. Built
/// fresh per request, never persisted.
#[derive(Debug, Clone, Default)]
pub struct DataContext {
    pub scalars: BTreeMap<String, String>,
    pub items: Vec<BTreeMap<String, String>>,
}

impl DataContext {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.scalars.get(name).map(String::as_str)
    }

    pub fn rows(&self, name: &str) -> Option<&[BTreeMap<String, String>]> {
        (name == LOOP_KEY).then_some(self.items.as_slice())
    }
}

/// Reformat a stored date into long display form, e.g. `2026-02-23` into
/// `23-February-2026`. Unparseable input passes through unchanged.
pub fn format_display_date(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()));
    match date {
        Some(d) => d.format("%d-%B-%Y").to_string(),
        None => raw.to_string(),
    }
}

fn money(v: f64) -> String {
    format!("{v:.2}")
}

fn or_default<'a>(v: &'a Option<String>, default: &'a str) -> &'a str {
    match v.as_deref() {
        Some(s) if !s.is_empty() => s,
        _ => default,
    }
}

/// Assemble the flat context for one render. Template authors rely on this
/// exact mapping; see the per-type rules in each entry. Fallback values keep
/// template previews rendering sensibly with partial data.
pub fn build_context(
    template_type: TemplateType,
    doc: &DocumentData,
    customer: &Customer,
    items: &[LineItem],
    settings: &CompanySettings,
) -> DataContext {
    let is_do = template_type == TemplateType::DeliveryOrder;
    let total = doc.total.unwrap_or(0.0);

    let rows: Vec<BTreeMap<String, String>> = items
        .iter()
        .map(|item| {
            let mut row = BTreeMap::new();
            row.insert(
                "description".to_string(),
                item.description.clone().unwrap_or_default(),
            );
            row.insert("quantity".to_string(), money(item.quantity.unwrap_or(0.0)));
            // Delivery orders carry no pricing.
            row.insert(
                "unit_price".to_string(),
                if is_do {
                    String::new()
                } else {
                    money(item.unit_price.unwrap_or(0.0))
                },
            );
            row.insert(
                "amount".to_string(),
                if is_do {
                    String::new()
                } else {
                    money(item.amount.unwrap_or(0.0))
                },
            );
            row
        })
        .collect();

    let mut s: BTreeMap<String, String> = BTreeMap::new();
    let mut put = |k: &str, v: String| {
        s.insert(k.to_string(), v);
    };

    // Document number resolves by type priority; the fixed fallback is only
    // seen in template-preview mode.
    put(
        "document_number",
        [&doc.quotation_number, &doc.invoice_number, &doc.do_number]
            .iter()
            .find_map(|v| match v.as_deref() {
                Some(s) if !s.is_empty() => Some(s.to_string()),
                _ => None,
            })
            .unwrap_or_else(|| "DOC-PREVIEW-1234".to_string()),
    );
    put(
        "document_date",
        format_display_date(or_default(
            &doc.issue_date.clone().filter(|s| !s.is_empty()).or_else(|| doc.delivery_date.clone()),
            "2026-02-23",
        )),
    );
    put(
        "quotation_date",
        format_display_date(or_default(&doc.issue_date, "2026-02-23")),
    );
    put(
        "invoice_date",
        format_display_date(or_default(&doc.issue_date, "2026-02-23")),
    );
    put(
        "validity_date",
        format_display_date(or_default(&doc.expiry_date, "2026-03-01")),
    );
    put(
        "due_date",
        format_display_date(or_default(&doc.due_date, "2026-03-25")),
    );
    put(
        "delivery_date",
        format_display_date(or_default(&doc.delivery_date, "2026-02-24")),
    );
    put(
        "delivery_order_number",
        or_default(&doc.do_number, "DO-PREVIEW-1234").to_string(),
    );
    put(
        "delivery_address",
        doc.delivery_address.clone().unwrap_or_default(),
    );
    put("project_name", doc.project_name.clone().unwrap_or_default());
    put(
        "contact_person",
        doc.contact_person.clone().unwrap_or_default(),
    );
    put(
        "contact_phone",
        doc.contact_phone.clone().unwrap_or_default(),
    );
    put(
        "validity_days",
        format!("{} Days", doc.validity_days.unwrap_or(7)),
    );
    put(
        "subtotal",
        if is_do { String::new() } else { money(total) },
    );
    put("total", if is_do { String::new() } else { money(total) });
    put(
        "total_in_words",
        if is_do {
            String::new()
        } else {
            amount_in_words(total)
        },
    );
    put(
        "payment_term",
        doc.payment_terms.clone().unwrap_or_default(),
    );
    put("signature", "Authorized Signature".to_string());

    put(
        "customer_name",
        or_default(&customer.customer_name, "Preview Customer").to_string(),
    );
    put(
        "customer_company",
        or_default(&customer.company_name, "Preview Corp").to_string(),
    );
    put(
        "customer_address",
        or_default(&customer.billing_address, "123 Preview St").to_string(),
    );
    put(
        "customer_email",
        or_default(&customer.email, "customer@preview.com").to_string(),
    );

    put(
        "company_name",
        or_default(&settings.company_name, "Your Company Pte Ltd").to_string(),
    );
    put(
        "company_uen",
        or_default(&settings.uen, "123456789X").to_string(),
    );
    put("company_address", settings.address.clone().unwrap_or_default());
    put("company_email", settings.email.clone().unwrap_or_default());
    put("company_logo", settings.logo_url.clone().unwrap_or_default());

    DataContext { scalars: s, items: rows }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_items() -> Vec<LineItem> {
        vec![
            LineItem {
                description: Some("Widget".to_string()),
                quantity: Some(3.0),
                unit_price: Some(10.5),
                amount: Some(31.5),
            },
            LineItem {
                description: Some("Gadget".to_string()),
                quantity: Some(1.0),
                unit_price: Some(99.0),
                amount: Some(99.0),
            },
        ]
    }

    #[test]
    fn formats_display_dates_with_hyphens() {
        assert_eq!(format_display_date("2026-02-23"), "23-February-2026");
        assert_eq!(format_display_date("2026-12-01"), "01-December-2026");
        assert_eq!(format_display_date("not a date"), "not a date");
        assert_eq!(format_display_date(""), "");
    }

    #[test]
    fn document_number_resolves_by_priority() {
        let mut doc = DocumentData {
            quotation_number: Some("Q-001".to_string()),
            invoice_number: Some("INV-001".to_string()),
            do_number: Some("DO-001".to_string()),
            ..Default::default()
        };
        let ctx = build_context(
            TemplateType::Quotation,
            &doc,
            &Customer::default(),
            &[],
            &CompanySettings::default(),
        );
        assert_eq!(ctx.get("document_number"), Some("Q-001"));

        doc.quotation_number = None;
        let ctx = build_context(
            TemplateType::Invoice,
            &doc,
            &Customer::default(),
            &[],
            &CompanySettings::default(),
        );
        assert_eq!(ctx.get("document_number"), Some("INV-001"));

        doc.invoice_number = Some(String::new());
        doc.do_number = None;
        let ctx = build_context(
            TemplateType::Invoice,
            &doc,
            &Customer::default(),
            &[],
            &CompanySettings::default(),
        );
        assert_eq!(ctx.get("document_number"), Some("DOC-PREVIEW-1234"));
    }

    #[test]
    fn monetary_fields_use_two_decimals() {
        let doc = DocumentData {
            total: Some(130.5),
            ..Default::default()
        };
        let ctx = build_context(
            TemplateType::Invoice,
            &doc,
            &Customer::default(),
            &sample_items(),
            &CompanySettings::default(),
        );
        assert_eq!(ctx.get("subtotal"), Some("130.50"));
        assert_eq!(ctx.get("total"), Some("130.50"));
        assert_eq!(ctx.items[0].get("quantity").map(String::as_str), Some("3.00"));
        assert_eq!(
            ctx.items[0].get("unit_price").map(String::as_str),
            Some("10.50")
        );
        assert!(ctx
            .get("total_in_words")
            .is_some_and(|w| w.contains("One Hundred Thirty Singapore Dollars And Fifty Cents")));
    }

    #[test]
    fn delivery_order_suppresses_pricing() {
        let doc = DocumentData {
            total: Some(500.0),
            ..Default::default()
        };
        let ctx = build_context(
            TemplateType::DeliveryOrder,
            &doc,
            &Customer::default(),
            &sample_items(),
            &CompanySettings::default(),
        );
        assert_eq!(ctx.get("subtotal"), Some(""));
        assert_eq!(ctx.get("total"), Some(""));
        assert_eq!(ctx.get("total_in_words"), Some(""));
        for row in &ctx.items {
            assert_eq!(row.get("unit_price").map(String::as_str), Some(""));
            assert_eq!(row.get("amount").map(String::as_str), Some(""));
        }
        // Quantity survives on delivery orders.
        assert_eq!(ctx.items[0].get("quantity").map(String::as_str), Some("3.00"));
    }

    #[test]
    fn validity_days_gets_suffix_and_default() {
        let ctx = build_context(
            TemplateType::Quotation,
            &DocumentData {
                validity_days: Some(30),
                ..Default::default()
            },
            &Customer::default(),
            &[],
            &CompanySettings::default(),
        );
        assert_eq!(ctx.get("validity_days"), Some("30 Days"));

        let ctx = build_context(
            TemplateType::Quotation,
            &DocumentData::default(),
            &Customer::default(),
            &[],
            &CompanySettings::default(),
        );
        assert_eq!(ctx.get("validity_days"), Some("7 Days"));
    }

    #[test]
    fn preview_defaults_fill_missing_values() {
        let ctx = build_context(
            TemplateType::Quotation,
            &DocumentData::default(),
            &Customer::default(),
            &[],
            &CompanySettings::default(),
        );
        assert_eq!(ctx.get("customer_name"), Some("Preview Customer"));
        assert_eq!(ctx.get("company_name"), Some("Your Company Pte Ltd"));
        assert_eq!(ctx.get("company_uen"), Some("123456789X"));
        assert_eq!(ctx.get("document_date"), Some("23-February-2026"));
        assert_eq!(ctx.get("signature"), Some("Authorized Signature"));
        assert_eq!(ctx.get("company_address"), Some(""));
    }

    #[test]
    fn rows_only_answers_for_items_table() {
        let ctx = build_context(
            TemplateType::Invoice,
            &DocumentData::default(),
            &Customer::default(),
            &sample_items(),
            &CompanySettings::default(),
        );
        assert_eq!(ctx.rows("items_table").map(|r| r.len()), Some(2));
        assert!(ctx.rows("other_table").is_none());
    }

    #[test]
    fn render_request_deserializes_original_body_shape() {
        let body = r#"{
            "documentData": { "invoice_number": "INV-9", "total": 42.0 },
            "customer": { "customer_name": "Acme" },
            "items": [ { "description": "Widget", "quantity": 1, "unit_price": 42, "amount": 42 } ],
            "settings": { "company_name": "Tester Pte Ltd", "UEN": "201500001A" }
        }"#;
        let req: RenderRequest = serde_json::from_str(body).expect("deserialize");
        assert_eq!(req.document_data.invoice_number.as_deref(), Some("INV-9"));
        assert_eq!(req.settings.uen.as_deref(), Some("201500001A"));
        assert_eq!(req.items.len(), 1);
    }
}
