use std::collections::HashMap;

use chrono::Local;
use log::{error, warn};

use crate::formula::{evaluate, is_numeric, TextTemplate};
use crate::registry::TemplateRegistry;
use crate::store::{ReportDraft, ReportStore, SavedReport, StoreError};
use crate::template::{FieldKind, InputKind, ReportTemplate, TemplateField};

/// Field id that is auto-filled with the current date when left empty.
pub const DATE_FIELD_ID: &str = "date_field";
/// Field id that is optional on submission and omitted from the share text
/// when empty.
pub const NOTES_FIELD_ID: &str = "additional_notes";

pub const DATE_FORMAT: &str = "%d/%m/%y";
pub const TIMESTAMP_FORMAT: &str = "%d/%m/%y %H:%M";

/// Runtime state of one editable or calculated field.
#[derive(Clone, Debug)]
pub struct FieldItem {
    internal_id: String,
    display_label: String,
    pub value: String,
    input_kind: InputKind,
    editable: bool,
    is_custom: bool,
    parent_section_id: Option<String>,
    pub error: bool,
    formula: Option<TextTemplate>,
}

impl FieldItem {
    fn from_template(field: &TemplateField) -> Self {
        FieldItem {
            internal_id: field.internal_id().to_string(),
            display_label: field.display_label().to_string(),
            value: field.default_value().unwrap_or("").to_string(),
            input_kind: field.input_kind(),
            editable: field.is_editable(),
            is_custom: field.is_custom(),
            parent_section_id: field.parent_section_id().map(str::to_string),
            error: false,
            formula: field.calculation_formula().map(TextTemplate::parse),
        }
    }

    pub fn internal_id(&self) -> &str {
        &self.internal_id
    }

    pub fn display_label(&self) -> &str {
        &self.display_label
    }

    pub fn input_kind(&self) -> InputKind {
        self.input_kind
    }

    pub fn is_editable(&self) -> bool {
        self.editable
    }

    pub fn is_custom(&self) -> bool {
        self.is_custom
    }

    pub fn parent_section_id(&self) -> Option<&str> {
        self.parent_section_id.as_deref()
    }

    pub fn is_calculated(&self) -> bool {
        self.formula.is_some()
    }
}

/// Runtime state of a section header. Owns the derived list of its section
/// fields' ids; the authoritative render order stays the flat item sequence.
#[derive(Clone, Debug)]
pub struct HeaderItem {
    internal_id: String,
    display_label: String,
    is_custom: bool,
    pub error: bool,
    pub section_ids: Vec<String>,
}

impl HeaderItem {
    fn from_template(field: &TemplateField) -> Self {
        HeaderItem {
            internal_id: field.internal_id().to_string(),
            display_label: field.display_label().to_string(),
            is_custom: field.is_custom(),
            error: false,
            section_ids: Vec::new(),
        }
    }

    pub fn internal_id(&self) -> &str {
        &self.internal_id
    }

    pub fn display_label(&self) -> &str {
        &self.display_label
    }

    pub fn is_custom(&self) -> bool {
        self.is_custom
    }
}

/// One entry of a materialized form. The three shapes are matched
/// exhaustively wherever behavior differs; headers carry no value.
#[derive(Clone, Debug)]
pub enum FormItem {
    Field(FieldItem),
    Header(HeaderItem),
    Section(FieldItem),
}

impl FormItem {
    pub fn internal_id(&self) -> &str {
        match self {
            FormItem::Field(f) | FormItem::Section(f) => f.internal_id(),
            FormItem::Header(h) => h.internal_id(),
        }
    }

    pub fn display_label(&self) -> &str {
        match self {
            FormItem::Field(f) | FormItem::Section(f) => f.display_label(),
            FormItem::Header(h) => h.display_label(),
        }
    }

    /// Display rename only — the internal id never changes.
    pub fn set_display_label(&mut self, label: impl Into<String>) {
        match self {
            FormItem::Field(f) | FormItem::Section(f) => f.display_label = label.into(),
            FormItem::Header(h) => h.display_label = label.into(),
        }
    }

    pub fn value(&self) -> Option<&str> {
        self.as_field().map(|f| f.value.as_str())
    }

    pub fn error(&self) -> bool {
        match self {
            FormItem::Field(f) | FormItem::Section(f) => f.error,
            FormItem::Header(h) => h.error,
        }
    }

    pub fn set_error(&mut self, error: bool) {
        match self {
            FormItem::Field(f) | FormItem::Section(f) => f.error = error,
            FormItem::Header(h) => h.error = error,
        }
    }

    pub fn is_calculated(&self) -> bool {
        self.as_field().is_some_and(FieldItem::is_calculated)
    }

    /// The field payload for both top-level and section fields, `None` for
    /// headers.
    pub fn as_field(&self) -> Option<&FieldItem> {
        match self {
            FormItem::Field(f) | FormItem::Section(f) => Some(f),
            FormItem::Header(_) => None,
        }
    }

    pub fn as_field_mut(&mut self) -> Option<&mut FieldItem> {
        match self {
            FormItem::Field(f) | FormItem::Section(f) => Some(f),
            FormItem::Header(_) => None,
        }
    }
}

/// Reverse index from a field id to the calculated fields whose formulas
/// reference it. Discovery-ordered: items first, then token order within each
/// formula. Single level only — no transitive closure, no cycle detection.
pub fn build_dependency_map(items: &[FormItem]) -> HashMap<String, Vec<String>> {
    let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();
    for item in items {
        let Some(field) = item.as_field() else { continue };
        let Some(formula) = &field.formula else { continue };
        for referenced in formula.refs() {
            dependencies
                .entry(referenced.to_string())
                .or_default()
                .push(field.internal_id.clone());
        }
    }
    dependencies
}

/// A report being filled in: the materialized items of one template plus the
/// recalculation machinery.
///
/// Every operation is a plain synchronous call; an edit triggers exactly one
/// level of dependent recalculation and recalculation never produces further
/// edits, so the engine is non-reentrant by construction.
pub struct ReportForm {
    template: ReportTemplate,
    items: Vec<FormItem>,
    index: HashMap<String, usize>,
    dependencies: HashMap<String, Vec<String>>,
    report_tmpl: TextTemplate,
    preview_tmpl: TextTemplate,
    report_id: Option<i64>,
    title: Option<String>,
}

impl ReportForm {
    /// Materializes a fresh form from `template`.
    pub fn new(template: ReportTemplate) -> Self {
        for finding in template.lint() {
            warn!("template `{}`: {finding}", template.template_id());
        }
        let report_tmpl = TextTemplate::parse(template.report_format());
        let preview_tmpl = TextTemplate::parse(template.preview_format());
        let mut form = ReportForm {
            template,
            items: Vec::new(),
            index: HashMap::new(),
            dependencies: HashMap::new(),
            report_tmpl,
            preview_tmpl,
            report_id: None,
            title: None,
        };
        form.instantiate();
        form.title = Some(form.default_title());
        form
    }

    /// Re-opens a saved report. A record whose template has disappeared from
    /// the registry falls back to the built-in default; values for fields the
    /// fallback template lacks are dropped.
    pub fn open(record: &SavedReport, registry: &TemplateRegistry) -> Self {
        if registry.get(&record.template_id).is_none() {
            warn!(
                "template `{}` not found for report {}; falling back to the built-in default",
                record.template_id, record.id
            );
        }
        let template = registry.get_or_builtin(&record.template_id).clone();
        let mut form = ReportForm::new(template);
        match serde_json::from_str::<HashMap<String, String>>(&record.values_json) {
            Ok(values) => form.apply_loaded_values(&values),
            Err(err) => error!("failed to parse saved values for report {}: {err}", record.id),
        }
        form.report_id = Some(record.id);
        form.title = Some(record.title.clone());
        form
    }

    fn instantiate(&mut self) {
        self.items.clear();
        self.index.clear();
        self.dependencies.clear();

        let mut header_positions: HashMap<String, usize> = HashMap::new();
        for field in self.template.fields() {
            match field.kind() {
                FieldKind::Field => {
                    self.items.push(FormItem::Field(FieldItem::from_template(field)));
                }
                FieldKind::Header => {
                    header_positions.insert(field.internal_id().to_string(), self.items.len());
                    self.items.push(FormItem::Header(HeaderItem::from_template(field)));
                }
                FieldKind::SectionField => {
                    let parent = field
                        .parent_section_id()
                        .and_then(|id| header_positions.get(id).copied());
                    match parent {
                        Some(position) => {
                            if let FormItem::Header(header) = &mut self.items[position] {
                                header.section_ids.push(field.internal_id().to_string());
                            }
                            self.items.push(FormItem::Section(FieldItem::from_template(field)));
                        }
                        None => error!(
                            "parent header `{}` not found for section field `{}`; dropping it",
                            field.parent_section_id().unwrap_or("<none>"),
                            field.internal_id()
                        ),
                    }
                }
            }
        }

        for (position, item) in self.items.iter().enumerate() {
            self.index.insert(item.internal_id().to_string(), position);
        }

        self.apply_date_default();
        self.dependencies = build_dependency_map(&self.items);
        self.recalculate_all();
    }

    /// Overwrites item values from a saved id → value map, then re-applies
    /// the date default and recalculates every calculated field once.
    pub fn apply_loaded_values(&mut self, values: &HashMap<String, String>) {
        for item in &mut self.items {
            let Some(field) = item.as_field_mut() else { continue };
            if let Some(value) = values.get(&field.internal_id) {
                field.value = value.clone();
            }
        }
        self.apply_date_default();
        self.recalculate_all();
    }

    /// Records a user edit and recalculates every calculated field that
    /// directly references `field_id`. One level only: dependents of the
    /// recalculated fields are NOT revisited.
    pub fn set_field_value(&mut self, field_id: &str, new_value: &str) {
        let Some(&position) = self.index.get(field_id) else { return };
        match self.items[position].as_field_mut() {
            Some(field) => field.value = new_value.to_string(),
            None => return,
        }
        let dependents = self.dependencies.get(field_id).cloned().unwrap_or_default();
        for dependent in dependents {
            if let Some(&i) = self.index.get(&dependent) {
                if self.items[i].is_calculated() {
                    self.recalculate_at(i);
                }
            }
        }
    }

    fn apply_date_default(&mut self) {
        if let Some(&position) = self.index.get(DATE_FIELD_ID) {
            if let Some(field) = self.items[position].as_field_mut() {
                if field.value.is_empty() {
                    field.value = Local::now().format(DATE_FORMAT).to_string();
                }
            }
        }
    }

    fn recalculate_all(&mut self) {
        for position in 0..self.items.len() {
            if self.items[position].is_calculated() {
                self.recalculate_at(position);
            }
        }
    }

    fn recalculate_at(&mut self, position: usize) {
        let Some(formula) = self.items[position]
            .as_field()
            .and_then(|f| f.formula.clone())
        else {
            return;
        };

        let mut inputs = HashMap::new();
        let mut all_numeric = true;
        for referenced in formula.refs() {
            let value = self
                .index
                .get(referenced)
                .and_then(|&i| self.items[i].as_field())
                .map(|f| f.value.as_str())
                .filter(|v| !v.is_empty())
                .unwrap_or("0")
                .to_string();
            if !is_numeric(&value) {
                all_numeric = false;
            }
            inputs.insert(referenced.to_string(), value);
        }

        let id = self.items[position].internal_id().to_string();
        let new_value = if !all_numeric {
            warn!("non-numeric input in calculation for `{id}`");
            "Error".to_string()
        } else {
            match evaluate(&formula.render(&inputs)) {
                Ok(result) => format!("{result:.2}"),
                Err(err) => {
                    warn!("failed to evaluate formula for `{id}`: {err}");
                    "Error".to_string()
                }
            }
        };
        if let Some(field) = self.items[position].as_field_mut() {
            field.value = new_value;
        }
    }

    /// Checks every editable field for an empty trimmed value and returns the
    /// offending ids. The date field is auto-filled instead of reported; the
    /// notes field is optional. Callers flag the returned fields
    /// ([`mark_errors`](Self::mark_errors)) and abort submission when the
    /// list is non-empty.
    pub fn validate_for_submission(&mut self) -> Vec<String> {
        let mut missing = Vec::new();
        for item in &mut self.items {
            let Some(field) = item.as_field_mut() else { continue };
            if !field.editable || !field.value.trim().is_empty() {
                continue;
            }
            if field.internal_id == DATE_FIELD_ID {
                field.value = Local::now().format(DATE_FORMAT).to_string();
            } else if field.internal_id != NOTES_FIELD_ID {
                missing.push(field.internal_id.clone());
            }
        }
        missing
    }

    pub fn mark_errors(&mut self, ids: &[String]) {
        for id in ids {
            if let Some(&position) = self.index.get(id) {
                self.items[position].set_error(true);
            }
        }
    }

    pub fn clear_errors(&mut self) {
        for item in &mut self.items {
            item.set_error(false);
        }
    }

    /// Flat id → value map over all non-header items.
    pub fn field_values(&self) -> HashMap<String, String> {
        let mut values = HashMap::new();
        for item in &self.items {
            if let Some(field) = item.as_field() {
                values.insert(field.internal_id.clone(), field.value.clone());
            }
        }
        values
    }

    pub fn render_preview(&self) -> String {
        self.preview_tmpl.render(&self.field_values())
    }

    /// The shareable report text. An empty notes field is omitted outright —
    /// token and trailing newline — rather than substituted with `"0"`.
    pub fn render_share_text(&self) -> String {
        let values = self.field_values();
        let notes_empty = values
            .get(NOTES_FIELD_ID)
            .map(|v| v.trim().is_empty())
            .unwrap_or(true);
        if notes_empty {
            self.report_tmpl.render_omitting(&values, NOTES_FIELD_ID)
        } else {
            self.report_tmpl.render(&values)
        }
    }

    /// The tuple handed to the store on save. The id and created-at stamp
    /// stay with the store.
    pub fn to_draft(&self) -> ReportDraft {
        let now = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let title = match self.title.as_deref() {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => format!("{} - {}", self.template.name(), now),
        };
        ReportDraft {
            title,
            last_edited_at: now,
            preview_text: self.render_preview(),
            values_json: serde_json::to_string(&self.field_values())
                .expect("string map serializes"),
            template_id: self.template.template_id().to_string(),
        }
    }

    /// Inserts a new record or updates the one this form was opened from.
    /// A form stays editable after saving and may be saved again.
    pub fn save(&mut self, store: &mut ReportStore) -> Result<i64, StoreError> {
        let draft = self.to_draft();
        match self.report_id {
            Some(id) => {
                store.update(id, draft)?;
                Ok(id)
            }
            None => {
                let id = store.insert(draft)?;
                self.report_id = Some(id);
                Ok(id)
            }
        }
    }

    /// Whether any non-header item holds a non-blank value. Auto-save skips
    /// new forms with no content.
    pub fn has_content(&self) -> bool {
        self.items
            .iter()
            .any(|item| item.as_field().is_some_and(|f| !f.value.trim().is_empty()))
    }

    pub fn default_title(&self) -> String {
        format!("{} - {}", self.template.name(), Local::now().format(DATE_FORMAT))
    }

    pub fn template(&self) -> &ReportTemplate {
        &self.template
    }

    pub fn items(&self) -> &[FormItem] {
        &self.items
    }

    pub fn item(&self, field_id: &str) -> Option<&FormItem> {
        self.index.get(field_id).map(|&i| &self.items[i])
    }

    pub fn value_of(&self, field_id: &str) -> Option<&str> {
        self.item(field_id).and_then(FormItem::value)
    }

    pub fn report_id(&self) -> Option<i64> {
        self.report_id
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = Some(title.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::BUILTIN_TEMPLATE_ID;

    fn arithmetic_template() -> ReportTemplate {
        ReportTemplate::new(
            "t_arith",
            "Arithmetic",
            "",
            vec![
                TemplateField::field("a", "A", InputKind::NumberDecimal),
                TemplateField::field("b", "B", InputKind::NumberDecimal),
                TemplateField::calculated("c", "C", "{a} + {b}"),
                TemplateField::field("d", "D", InputKind::Text),
            ],
            "A {a} B {b} C {c}\n",
            "C {c}",
        )
    }

    #[test]
    fn instantiate_fills_date_and_recalculates() {
        let form = ReportForm::new(ReportTemplate::builtin_default());
        assert!(!form.value_of(DATE_FIELD_ID).unwrap().is_empty());
        // Empty inputs substitute as 0, so calculated fields start at 0.00.
        assert_eq!(form.value_of("till_net"), Some("0.00"));
        assert_eq!(form.value_of("shift_total"), Some("0.00"));
    }

    #[test]
    fn header_tracks_its_section_fields() {
        let form = ReportForm::new(ReportTemplate::builtin_default());
        let Some(FormItem::Header(header)) = form.item("header_drinks") else {
            panic!("expected a header item");
        };
        assert_eq!(header.section_ids, ["drinks_sold", "drinks_stock"]);
    }

    #[test]
    fn edit_propagates_to_dependents() {
        let mut form = ReportForm::new(arithmetic_template());
        form.set_field_value("b", "4");
        form.set_field_value("a", "3");
        assert_eq!(form.value_of("c"), Some("7.00"));

        // Editing an unreferenced sibling leaves the calculated field alone.
        form.set_field_value("d", "whatever");
        assert_eq!(form.value_of("c"), Some("7.00"));
    }

    #[test]
    fn edit_does_not_cascade() {
        let template = ReportTemplate::new(
            "t_chain",
            "Chain",
            "",
            vec![
                TemplateField::field("a", "A", InputKind::NumberDecimal),
                TemplateField::calculated("c1", "C1", "{a}"),
                TemplateField::calculated("c2", "C2", "{c1}"),
            ],
            "",
            "",
        );
        let mut form = ReportForm::new(template);
        assert_eq!(form.value_of("c1"), Some("0.00"));
        assert_eq!(form.value_of("c2"), Some("0.00"));

        form.set_field_value("a", "2");
        assert_eq!(form.value_of("c1"), Some("2.00"));
        // Single-level propagation: c2 is not revisited by the edit to a.
        assert_eq!(form.value_of("c2"), Some("0.00"));
    }

    #[test]
    fn non_numeric_input_yields_error_value() {
        let mut form = ReportForm::new(arithmetic_template());
        form.set_field_value("a", "abc");
        assert_eq!(form.value_of("c"), Some("Error"));
        // Recovering the input recovers the field.
        form.set_field_value("a", "1.5");
        assert_eq!(form.value_of("c"), Some("1.50"));
    }

    #[test]
    fn division_by_zero_yields_error_value() {
        let template = ReportTemplate::new(
            "t_div",
            "Div",
            "",
            vec![
                TemplateField::field("a", "A", InputKind::NumberDecimal),
                TemplateField::field("b", "B", InputKind::NumberDecimal),
                TemplateField::calculated("q", "Q", "{a} / {b}"),
            ],
            "",
            "",
        );
        let mut form = ReportForm::new(template);
        form.set_field_value("a", "4");
        assert_eq!(form.value_of("q"), Some("Error"));
        form.set_field_value("b", "2");
        assert_eq!(form.value_of("q"), Some("2.00"));
    }

    #[test]
    fn validation_exempts_date_and_notes() {
        let template = ReportTemplate::new(
            "t_val",
            "Validation",
            "",
            vec![
                TemplateField::field(DATE_FIELD_ID, "Date", InputKind::Text),
                TemplateField::field("one", "One", InputKind::NumberDecimal),
                TemplateField::field("two", "Two", InputKind::NumberDecimal),
                TemplateField::field(NOTES_FIELD_ID, "Notes", InputKind::MultilineText),
            ],
            "",
            "",
        );
        let mut form = ReportForm::new(template);
        form.set_field_value(DATE_FIELD_ID, "");

        let missing = form.validate_for_submission();
        assert_eq!(missing, ["one", "two"]);
        assert!(!form.value_of(DATE_FIELD_ID).unwrap().is_empty());

        form.mark_errors(&missing);
        assert!(form.item("one").unwrap().error());
        assert!(form.item("two").unwrap().error());
        assert!(!form.item(NOTES_FIELD_ID).unwrap().error());
        form.clear_errors();
        assert!(!form.item("one").unwrap().error());
    }

    #[test]
    fn calculated_fields_are_not_validated() {
        let mut form = ReportForm::new(arithmetic_template());
        form.set_field_value("a", "1");
        form.set_field_value("b", "2");
        form.set_field_value("d", "x");
        assert!(form.validate_for_submission().is_empty());
    }

    #[test]
    fn share_text_omits_empty_notes() {
        let template = ReportTemplate::new(
            "t_notes",
            "Notes",
            "",
            vec![
                TemplateField::field("total", "Total", InputKind::NumberDecimal),
                TemplateField::field(NOTES_FIELD_ID, "Notes", InputKind::MultilineText),
            ],
            "Total {total}\n{additional_notes}\nBye\n",
            "",
        );
        let mut form = ReportForm::new(template);
        form.set_field_value("total", "12");
        assert_eq!(form.render_share_text(), "Total 12\nBye\n");

        form.set_field_value(NOTES_FIELD_ID, "two\nlines");
        assert_eq!(form.render_share_text(), "Total 12\ntwo\nlines\nBye\n");
    }

    #[test]
    fn preview_defaults_missing_references_to_zero() {
        let template = ReportTemplate::new(
            "t_prev",
            "Preview",
            "",
            vec![TemplateField::field("a", "A", InputKind::NumberDecimal)],
            "",
            "A {a} missing {ghost}",
        );
        let mut form = ReportForm::new(template);
        form.set_field_value("a", "5");
        assert_eq!(form.render_preview(), "A 5 missing 0");
    }

    #[test]
    fn loaded_values_overwrite_and_recalculate() {
        let mut form = ReportForm::new(arithmetic_template());
        let mut values = HashMap::new();
        values.insert("a".to_string(), "10".to_string());
        values.insert("b".to_string(), "2.5".to_string());
        values.insert("vanished_field".to_string(), "dropped".to_string());
        form.apply_loaded_values(&values);
        assert_eq!(form.value_of("a"), Some("10"));
        assert_eq!(form.value_of("c"), Some("12.50"));
        assert!(form.item("vanished_field").is_none());
    }

    #[test]
    fn field_values_exclude_headers() {
        let form = ReportForm::new(ReportTemplate::builtin_default());
        let values = form.field_values();
        assert!(!values.contains_key("header_drinks"));
        assert!(values.contains_key("drinks_sold"));
    }

    #[test]
    fn orphan_section_field_is_dropped() {
        let template = ReportTemplate::new(
            "t_orphan",
            "Orphan",
            "",
            vec![
                TemplateField::field("a", "A", InputKind::Text),
                TemplateField::section("lost", "Lost", InputKind::Text, "no_such_header"),
            ],
            "",
            "",
        );
        let form = ReportForm::new(template);
        assert!(form.item("lost").is_none());
        assert_eq!(form.items().len(), 1);
    }

    #[test]
    fn draft_round_trips_values() {
        let mut form = ReportForm::new(arithmetic_template());
        form.set_field_value("a", "1");
        form.set_title("Tuesday close");
        let draft = form.to_draft();
        assert_eq!(draft.title, "Tuesday close");
        assert_eq!(draft.template_id, "t_arith");
        let values: HashMap<String, String> = serde_json::from_str(&draft.values_json).unwrap();
        assert_eq!(values.get("a").map(String::as_str), Some("1"));
        assert!(!values.contains_key("header_drinks"));
    }

    #[test]
    fn new_form_title_defaults_from_template_name() {
        let form = ReportForm::new(arithmetic_template());
        assert!(form.title().unwrap().starts_with("Arithmetic - "));
    }

    #[test]
    fn builtin_totals_follow_the_two_pass_evaluator() {
        let mut form = ReportForm::new(ReportTemplate::builtin_default());
        form.set_field_value("till_cash", "250.50");
        form.set_field_value("till_float", "50");
        form.set_field_value("card_total", "100.25");
        assert_eq!(form.value_of("till_net"), Some("200.50"));
        assert_eq!(form.value_of("shift_total"), Some("300.75"));
        assert_eq!(form.render_preview(), "Net 200.50 | Card 100.25 | Total 300.75");
    }

    #[test]
    fn default_template_id_is_stable() {
        assert_eq!(
            ReportForm::new(ReportTemplate::builtin_default())
                .template()
                .template_id(),
            BUILTIN_TEMPLATE_ID
        );
    }
}
