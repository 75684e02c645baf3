//! Receipt parsing scenarios
//!
//! Extractor tests against realistic OCR output, including the noise that
//! comes with it: store codes, register lines, uneven spacing, and missing
//! fields.

use spendscan::extraction::ReceiptFieldExtractor;
use spendscan::validation::{parse_receipt_date, validate_amount};

#[test]
fn test_grocery_receipt_full_parse() {
    let text = "\
TRADER JOE'S
Store #542
617 W End Ave
03/22/2024 14:31
Organic Bananas 1.99
Almond Butter 6.49
Sourdough Loaf 4.29
Sub Total 12.77
Sales Tax 1.02
Total $13.79
Thank you for shopping";

    let data = ReceiptFieldExtractor::new().extract(text);
    assert_eq!(data.merchant.as_deref(), Some("TRADER JOE'S"));
    assert_eq!(data.date.as_deref(), Some("03/22/2024"));
    assert_eq!(data.subtotal.as_deref(), Some("12.77"));
    assert_eq!(data.tax.as_deref(), Some("1.02"));
    assert_eq!(data.total.as_deref(), Some("13.79"));

    let descriptions: Vec<&str> = data.items.iter().map(|i| i.description.as_str()).collect();
    assert_eq!(
        descriptions,
        vec!["Organic Bananas", "Almond Butter", "Sourdough Loaf"]
    );
}

#[test]
fn test_cafe_receipt_with_written_date() {
    let text = "\
Corner Bakery Cafe
January 5, 2024
Latte 4.75
Croissant 3.50
Total: 8.25";

    let data = ReceiptFieldExtractor::new().extract(text);
    assert_eq!(data.merchant.as_deref(), Some("Corner Bakery Cafe"));
    assert_eq!(data.date.as_deref(), Some("January 5, 2024"));
    assert_eq!(data.total.as_deref(), Some("8.25"));
    assert_eq!(data.items.len(), 2);
}

#[test]
fn test_minimal_receipt_without_labels() {
    // No keyword total anywhere: the largest plausible token wins
    let text = "QUICK MART\nsnack 2.10\nsoda 1.80\n15.60";
    let data = ReceiptFieldExtractor::new().extract(text);
    assert_eq!(data.merchant.as_deref(), Some("QUICK MART"));
    assert_eq!(data.total.as_deref(), Some("15.60"));
    assert_eq!(data.date, None);
}

#[test]
fn test_garbage_text_yields_mostly_empty_record() {
    let text = "~~~\n###\n12 34 56";
    let data = ReceiptFieldExtractor::new().extract(text);
    assert_eq!(data.date, None);
    assert_eq!(data.total, None);
    assert!(data.items.is_empty());
    // First non-empty line comes back as the merchant fallback
    assert_eq!(data.merchant.as_deref(), Some("~~~"));
}

#[test]
fn test_extracted_amounts_validate_downstream() {
    let text = "SHOP\nCoffee 4.50\nTotal: $45.67";
    let data = ReceiptFieldExtractor::new().extract(text);

    let total = data.total.unwrap();
    assert_eq!(validate_amount(&total).unwrap(), 45.67);
    let price = &data.items[0].price;
    assert_eq!(validate_amount(price).unwrap(), 4.5);
}

#[test]
fn test_extracted_date_parses_downstream() {
    let text = "SHOP\n01/15/2024\nTotal: 1.00";
    let data = ReceiptFieldExtractor::new().extract(text);

    let parsed = parse_receipt_date(&data.date.unwrap()).unwrap();
    assert_eq!(
        parsed,
        chrono::NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
    );
}
