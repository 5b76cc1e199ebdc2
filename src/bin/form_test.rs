use shift_report::{
    evaluate, substitute, ReportForm, ReportStore, ReportTemplate, TemplateRegistry,
};

use std::collections::HashMap;

// Test the two-pass expression evaluator against hand-derived goldens
fn test_evaluator() {
    println!("\n====== Testing evaluate ======");

    assert_eq!(evaluate("10 + 5 * 2").unwrap(), 20.0);
    println!("✓ '10 + 5 * 2' = 20 (mult/div pass first)");

    assert_eq!(evaluate("10 * 2 + 5 * 2").unwrap(), 30.0);
    assert_eq!(evaluate("2*3*4").unwrap(), 24.0);
    assert_eq!(evaluate("100/5/2").unwrap(), 10.0);
    println!("✓ Chained mult/div collapses pairwise left-to-right");

    assert_eq!(evaluate("10 - 3 * -2").unwrap(), 4.0);
    println!("✓ '10 - 3 * -2' = 4 (two-pass fold, not standard precedence)");

    assert!(evaluate("4 / 0").is_err());
    println!("✓ Division by zero is rejected");

    assert!(evaluate("10@20").is_err());
    println!("✓ Malformed token is rejected");
}

// Test placeholder substitution defaults
fn test_substitution() {
    println!("\n====== Testing substitute ======");

    let mut values = HashMap::new();
    assert_eq!(substitute("Total: {missing_id}", &values), "Total: 0");
    println!("✓ Missing key substitutes as literal 0");

    values.insert("a".to_string(), "{b}".to_string());
    assert_eq!(substitute("{a}", &values), "{b}");
    println!("✓ Replacement text is not re-scanned");
}

// Walk a full form session on the built-in template
fn test_form_flow() {
    println!("\n====== Testing form flow ======");

    let mut form = ReportForm::new(ReportTemplate::builtin_default());
    assert!(!form.value_of("date_field").unwrap().is_empty());
    println!("✓ Date field auto-filled on a new form");

    assert_eq!(form.value_of("till_net"), Some("0.00"));
    println!("✓ Calculated fields start from empty inputs as 0.00");

    form.set_field_value("till_cash", "250.50");
    form.set_field_value("till_float", "50");
    form.set_field_value("card_total", "100.25");
    assert_eq!(form.value_of("till_net"), Some("200.50"));
    assert_eq!(form.value_of("shift_total"), Some("300.75"));
    println!("✓ Edits propagate to dependent calculated fields");

    form.set_field_value("till_float", "abc");
    assert_eq!(form.value_of("till_net"), Some("Error"));
    form.set_field_value("till_float", "50");
    assert_eq!(form.value_of("till_net"), Some("200.50"));
    println!("✓ Non-numeric input flags only the affected field");

    let missing = form.validate_for_submission();
    assert!(!missing.is_empty());
    assert!(!missing.contains(&"additional_notes".to_string()));
    println!("✓ Validation reports empty fields, notes exempt");

    for id in &missing {
        form.set_field_value(id, "1");
    }
    assert!(form.validate_for_submission().is_empty());

    let text = form.render_share_text();
    assert!(!text.contains("{"));
    assert!(!text.contains("additional_notes"));
    assert!(!text.contains("\n\n"));
    println!("✓ Share text rendered, empty notes line omitted");

    form.set_field_value("additional_notes", "late delivery");
    assert!(form.render_share_text().contains("late delivery"));
    println!("✓ Non-empty notes appear in the share text");
}

// Save, list and re-open reports through the store and registry
fn test_save_and_reload() {
    println!("\n====== Testing save and reload ======");

    let dir = std::env::temp_dir().join(format!("shift-report-test-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);

    let registry = TemplateRegistry::open(&dir).unwrap();
    let mut store = ReportStore::open(dir.join("reports.bin.gz")).unwrap();

    let mut form = ReportForm::new(registry.current_template().clone());
    form.set_field_value("till_cash", "75");
    form.set_title("Friday close");
    let id = form.save(&mut store).unwrap();
    assert_eq!(id, 1);
    println!("✓ First save assigns id 1");

    form.set_field_value("till_cash", "80");
    assert_eq!(form.save(&mut store).unwrap(), id);
    println!("✓ Re-saving updates in place");

    let record = store.get(id).unwrap().clone();
    assert_eq!(record.title, "Friday close");
    let reopened = ReportForm::open(&record, &registry);
    assert_eq!(reopened.value_of("till_cash"), Some("80"));
    assert_eq!(reopened.title(), Some("Friday close"));
    println!("✓ Saved report re-opens with its values and title");

    assert_eq!(store.list().len(), 1);
    assert!(store.has_reports_using_template(record.template_id.as_str()));
    println!("✓ Listing and template-usage lookup work");

    let _ = std::fs::remove_dir_all(&dir);
}

pub fn run_tests() {
    println!("Starting shift-report scenario tests");
    test_evaluator();
    test_substitution();
    test_form_flow();
    test_save_and_reload();
    println!("\nAll tests passed!");
}

fn main() {
    env_logger::init();
    run_tests();
}
