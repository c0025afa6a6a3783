use std::io::Write as _;

use anyhow::Context;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::context::TemplateType;

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const ROOT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

/// Build a freshly constructed, valid starter template pre-seeded with the
/// standard placeholders for the given document type. Users download this,
/// restyle it in Word and upload it back through the validation gate.
pub fn generate_base_template(template_type: TemplateType) -> anyhow::Result<Vec<u8>> {
    let document = base_document_xml(template_type);
    pack_docx(&[
        ("[Content_Types].xml", CONTENT_TYPES_XML.as_bytes()),
        ("_rels/.rels", ROOT_RELS_XML.as_bytes()),
        ("word/document.xml", document.as_bytes()),
    ])
}

/// Assemble a DOCX archive from named parts, deflate-compressed.
pub(crate) fn pack_docx(parts: &[(&str, &[u8])]) -> anyhow::Result<Vec<u8>> {
    let mut zout = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let opts = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, data) in parts {
        zout.start_file(*name, opts)
            .with_context(|| format!("start zip file: {name}"))?;
        zout.write_all(data)
            .with_context(|| format!("write zip file: {name}"))?;
    }
    Ok(zout.finish().context("finish zip")?.into_inner())
}

fn run(text: &str, bold: bool, half_points: Option<u32>) -> String {
    let mut rpr = String::new();
    if bold {
        rpr.push_str("<w:b/>");
    }
    if let Some(sz) = half_points {
        rpr.push_str(&format!(r#"<w:sz w:val="{sz}"/>"#));
    }
    let rpr = if rpr.is_empty() {
        String::new()
    } else {
        format!("<w:rPr>{rpr}</w:rPr>")
    };
    format!(r#"<w:r>{rpr}<w:t xml:space="preserve">{text}</w:t></w:r>"#)
}

fn para(runs: &str, align: Option<&str>) -> String {
    let ppr = align
        .map(|a| format!(r#"<w:pPr><w:jc w:val="{a}"/></w:pPr>"#))
        .unwrap_or_default();
    format!("<w:p>{ppr}{runs}</w:p>")
}

fn text_para(text: &str) -> String {
    para(&run(text, false, None), None)
}

fn cell(paras: &str) -> String {
    format!("<w:tc>{paras}</w:tc>")
}

fn table(rows: &str) -> String {
    format!(
        r#"<w:tbl><w:tblPr><w:tblW w:w="5000" w:type="pct"/></w:tblPr>{rows}</w:tbl>"#
    )
}

fn base_document_xml(template_type: TemplateType) -> String {
    let is_do = template_type == TemplateType::DeliveryOrder;
    let title = match template_type {
        TemplateType::Quotation => "QUOTATION",
        TemplateType::Invoice => "TAX INVOICE",
        TemplateType::DeliveryOrder => "DELIVERY ORDER",
    };

    let mut body = String::new();
    body.push_str(&para(&run(title, true, Some(48)), Some("right")));
    body.push_str("<w:p/>");
    body.push_str(&para(&run("{{company_name}}", true, Some(28)), None));
    body.push_str(&text_para("{{company_address}}"));
    body.push_str(&text_para("UEN: {{company_uen}}"));
    body.push_str(&text_para("Email: {{company_email}}"));
    body.push_str("<w:p/>");

    // Bill-to block and document numbers, side by side.
    let bill_to = cell(&format!(
        "{}{}{}{}{}",
        para(&run("Bill To:", true, None), None),
        para(&run("{{customer_company}}", true, None), None),
        text_para("Attn: {{customer_name}}"),
        text_para("{{customer_address}}"),
        text_para("{{customer_email}}"),
    ));
    let doc_info = cell(&format!(
        "{}{}",
        para(&run("Document No: {{document_number}}", false, None), Some("right")),
        para(&run("Date: {{document_date}}", false, None), Some("right")),
    ));
    body.push_str(&table(&format!("<w:tr>{bill_to}{doc_info}</w:tr>")));
    body.push_str("<w:p/><w:p/>");

    // Items table: header row, then a single data row wrapped in the
    // repeating-region markers so each context row renders as a table row.
    let mut header = String::new();
    header.push_str(&cell(&para(&run("Description", true, None), None)));
    header.push_str(&cell(&para(&run("Qty", true, None), Some("center"))));
    if !is_do {
        header.push_str(&cell(&para(&run("Unit Price", true, None), Some("right"))));
        header.push_str(&cell(&para(&run("Amount", true, None), Some("right"))));
    }

    let mut data_row = String::new();
    data_row.push_str(&cell(&text_para("{{#items_table}}{{description}}")));
    if is_do {
        data_row.push_str(&cell(&para(
            &run("{{quantity}}{{/items_table}}", false, None),
            Some("center"),
        )));
    } else {
        data_row.push_str(&cell(&para(&run("{{quantity}}", false, None), Some("center"))));
        data_row.push_str(&cell(&para(&run("{{unit_price}}", false, None), Some("right"))));
        data_row.push_str(&cell(&para(
            &run("{{amount}}{{/items_table}}", false, None),
            Some("right"),
        )));
    }
    body.push_str(&table(&format!(
        "<w:tr>{header}</w:tr><w:tr>{data_row}</w:tr>"
    )));
    body.push_str("<w:p/>");

    if !is_do {
        body.push_str(&para(&run("Subtotal: {{subtotal}}", false, None), Some("right")));
        body.push_str(&para(&run("Total: {{total}}", true, None), Some("right")));
        body.push_str(&text_para("Amount in words: {{total_in_words}}"));
    }

    body.push_str("<w:p/><w:p/><w:p/>");
    body.push_str(&text_para("{{signature}}"));
    body.push_str(&text_para("___________________________"));

    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}<w:sectPr/></w:body></w:document>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{
        build_context, Customer, CompanySettings, DocumentData, LineItem,
    };
    use crate::docx::extract::extract_placeholders;
    use crate::docx::render::render_template;

    #[test]
    fn base_template_is_a_readable_package() {
        let docx = generate_base_template(TemplateType::Invoice).expect("generate");
        let tokens = extract_placeholders(&docx).expect("extract");
        assert!(tokens.contains(&"company_name".to_string()));
        assert!(tokens.contains(&"#items_table".to_string()));
        assert!(tokens.contains(&"/items_table".to_string()));
        assert!(tokens.contains(&"total_in_words".to_string()));
    }

    #[test]
    fn delivery_order_base_has_no_pricing_placeholders() {
        let docx = generate_base_template(TemplateType::DeliveryOrder).expect("generate");
        let tokens = extract_placeholders(&docx).expect("extract");
        assert!(!tokens.contains(&"unit_price".to_string()));
        assert!(!tokens.contains(&"subtotal".to_string()));
        assert!(!tokens.contains(&"total_in_words".to_string()));
        assert!(tokens.contains(&"quantity".to_string()));
    }

    #[test]
    fn base_template_renders_end_to_end() {
        let docx = generate_base_template(TemplateType::Quotation).expect("generate");
        let items = vec![
            LineItem {
                description: Some("Consulting".to_string()),
                quantity: Some(2.0),
                unit_price: Some(500.0),
                amount: Some(1000.0),
            },
            LineItem {
                description: Some("Support".to_string()),
                quantity: Some(1.0),
                unit_price: Some(234.5),
                amount: Some(234.5),
            },
        ];
        let ctx = build_context(
            TemplateType::Quotation,
            &DocumentData {
                quotation_number: Some("Q-2026-001".to_string()),
                total: Some(1234.5),
                ..Default::default()
            },
            &Customer::default(),
            &items,
            &CompanySettings::default(),
        );
        let out = render_template(&docx, &ctx).expect("render");
        assert!(extract_placeholders(&out).expect("re-extract").is_empty());

        let xml = String::from_utf8(
            crate::docx::package::DocxPackage::from_bytes(&out)
                .expect("package")
                .part("word/document.xml")
                .expect("doc part")
                .data
                .clone(),
        )
        .expect("utf8");
        assert!(xml.contains("Q-2026-001"));
        assert!(xml.contains("Consulting"));
        assert!(xml.contains("Support"));
        // Two context rows, header row included: three table rows in the
        // items table plus one in the bill-to table.
        assert_eq!(xml.matches("<w:tr>").count(), 4);
        assert!(xml.contains(
            "One Thousand Two Hundred Thirty Four Singapore Dollars And Fifty Cents Only"
        ));
    }
}
