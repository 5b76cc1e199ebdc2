use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;

use crate::formula::TextTemplate;

/// Id of the built-in template every registry carries. It cannot be deleted
/// and is the fallback whenever a referenced template has disappeared.
pub const BUILTIN_TEMPLATE_ID: &str = "builtin_shift_report";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldKind {
    Field,
    Header,
    SectionField,
}

/// Hint for the kind of input widget a renderer should offer for a field.
/// Carried as data only — the engine itself treats all values as strings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InputKind {
    #[default]
    Text,
    Number,
    NumberDecimal,
    NumberSigned,
    Phone,
    Date,
    Time,
    Password,
    Email,
    MultilineText,
}

impl InputKind {
    pub fn from_token(token: &str) -> Self {
        match token {
            "number" => InputKind::Number,
            "numberDecimal" => InputKind::NumberDecimal,
            "numberSigned" => InputKind::NumberSigned,
            "phone" => InputKind::Phone,
            "date" => InputKind::Date,
            "time" => InputKind::Time,
            "password" => InputKind::Password,
            "email" => InputKind::Email,
            "multilineText" => InputKind::MultilineText,
            // Unknown tokens from imported templates degrade to plain text.
            _ => InputKind::Text,
        }
    }

    pub fn as_token(self) -> &'static str {
        match self {
            InputKind::Text => "text",
            InputKind::Number => "number",
            InputKind::NumberDecimal => "numberDecimal",
            InputKind::NumberSigned => "numberSigned",
            InputKind::Phone => "phone",
            InputKind::Date => "date",
            InputKind::Time => "time",
            InputKind::Password => "password",
            InputKind::Email => "email",
            InputKind::MultilineText => "multilineText",
        }
    }

    pub fn is_multiline(self) -> bool {
        self == InputKind::MultilineText
    }
}

impl Serialize for InputKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_token())
    }
}

impl<'de> Deserialize<'de> for InputKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        Ok(InputKind::from_token(&token))
    }
}

/// One entry of a template's field list.
///
/// Immutable once constructed. A non-empty `calculation_formula` forces the
/// field to be non-editable, whatever the constructor was given — the
/// invariant holds on both the constructor path and the deserialization path
/// (which routes through [`RawTemplateField`]).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawTemplateField")]
pub struct TemplateField {
    kind: FieldKind,
    internal_id: String,
    display_label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    default_value: Option<String>,
    input_kind: InputKind,
    editable: bool,
    is_custom: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_section_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    calculation_formula: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTemplateField {
    kind: FieldKind,
    internal_id: String,
    display_label: String,
    #[serde(default)]
    default_value: Option<String>,
    #[serde(default)]
    input_kind: InputKind,
    #[serde(default)]
    editable: bool,
    #[serde(default)]
    is_custom: bool,
    #[serde(default)]
    parent_section_id: Option<String>,
    #[serde(default)]
    calculation_formula: Option<String>,
}

impl From<RawTemplateField> for TemplateField {
    fn from(raw: RawTemplateField) -> Self {
        TemplateField::new(
            raw.kind,
            raw.internal_id,
            raw.display_label,
            raw.default_value,
            raw.input_kind,
            raw.editable,
            raw.is_custom,
            raw.parent_section_id,
            raw.calculation_formula,
        )
    }
}

impl TemplateField {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: FieldKind,
        internal_id: impl Into<String>,
        display_label: impl Into<String>,
        default_value: Option<String>,
        input_kind: InputKind,
        editable: bool,
        is_custom: bool,
        parent_section_id: Option<String>,
        calculation_formula: Option<String>,
    ) -> Self {
        let calculated = calculation_formula
            .as_deref()
            .is_some_and(|f| !f.is_empty());
        TemplateField {
            kind,
            internal_id: internal_id.into(),
            display_label: display_label.into(),
            default_value,
            input_kind,
            editable: editable && !calculated,
            is_custom,
            parent_section_id,
            calculation_formula,
        }
    }

    pub fn field(internal_id: &str, display_label: &str, input_kind: InputKind) -> Self {
        Self::new(
            FieldKind::Field,
            internal_id,
            display_label,
            Some(String::new()),
            input_kind,
            true,
            false,
            None,
            None,
        )
    }

    pub fn header(internal_id: &str, display_label: &str) -> Self {
        Self::new(
            FieldKind::Header,
            internal_id,
            display_label,
            None,
            InputKind::Text,
            false,
            false,
            None,
            None,
        )
    }

    pub fn section(
        internal_id: &str,
        display_label: &str,
        input_kind: InputKind,
        parent_section_id: &str,
    ) -> Self {
        Self::new(
            FieldKind::SectionField,
            internal_id,
            display_label,
            Some(String::new()),
            input_kind,
            true,
            false,
            Some(parent_section_id.to_string()),
            None,
        )
    }

    pub fn calculated(internal_id: &str, display_label: &str, formula: &str) -> Self {
        Self::new(
            FieldKind::Field,
            internal_id,
            display_label,
            Some(String::new()),
            InputKind::NumberDecimal,
            false,
            false,
            None,
            Some(formula.to_string()),
        )
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn internal_id(&self) -> &str {
        &self.internal_id
    }

    pub fn display_label(&self) -> &str {
        &self.display_label
    }

    pub fn default_value(&self) -> Option<&str> {
        self.default_value.as_deref()
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

    pub fn calculation_formula(&self) -> Option<&str> {
        self.calculation_formula.as_deref().filter(|f| !f.is_empty())
    }

    pub fn is_calculated(&self) -> bool {
        self.calculation_formula().is_some()
    }
}

/// Declarative description of a whole report form: ordered fields plus the
/// two output formats. The field order defines rendering order; a section
/// field is linked to its header by id, not by nesting.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportTemplate {
    template_id: String,
    name: String,
    description: String,
    fields: Vec<TemplateField>,
    report_format: String,
    preview_format: String,
}

impl ReportTemplate {
    pub fn new(
        template_id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        fields: Vec<TemplateField>,
        report_format: impl Into<String>,
        preview_format: impl Into<String>,
    ) -> Self {
        ReportTemplate {
            template_id: template_id.into(),
            name: name.into(),
            description: description.into(),
            fields,
            report_format: report_format.into(),
            preview_format: preview_format.into(),
        }
    }

    pub fn template_id(&self) -> &str {
        &self.template_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn fields(&self) -> &[TemplateField] {
        &self.fields
    }

    pub fn report_format(&self) -> &str {
        &self.report_format
    }

    pub fn preview_format(&self) -> &str {
        &self.preview_format
    }

    /// Structural findings a template author should know about. None of these
    /// block import — the form engine degrades per finding (chained
    /// calculated fields do not auto-update, orphan section fields are
    /// dropped) — but they are logged when the template is instantiated.
    pub fn lint(&self) -> Vec<String> {
        let mut findings = Vec::new();
        let known: HashSet<&str> = self.fields.iter().map(|f| f.internal_id()).collect();
        let calculated: HashSet<&str> = self
            .fields
            .iter()
            .filter(|f| f.is_calculated())
            .map(|f| f.internal_id())
            .collect();
        let mut headers_seen: HashSet<&str> = HashSet::new();

        for field in &self.fields {
            match field.kind() {
                FieldKind::Header => {
                    headers_seen.insert(field.internal_id());
                }
                FieldKind::SectionField => match field.parent_section_id() {
                    Some(parent) if headers_seen.contains(parent) => {}
                    Some(parent) => findings.push(format!(
                        "section field `{}` references header `{}` before it is defined",
                        field.internal_id(),
                        parent
                    )),
                    None => findings.push(format!(
                        "section field `{}` has no parent header",
                        field.internal_id()
                    )),
                },
                FieldKind::Field => {}
            }

            if let Some(formula) = field.calculation_formula() {
                for referenced in TextTemplate::parse(formula).refs() {
                    if !known.contains(referenced) {
                        findings.push(format!(
                            "formula for `{}` references unknown field `{}`",
                            field.internal_id(),
                            referenced
                        ));
                    } else if calculated.contains(referenced) {
                        findings.push(format!(
                            "formula for `{}` references calculated field `{}`; \
                             chained calculated fields do not auto-update",
                            field.internal_id(),
                            referenced
                        ));
                    }
                }
            }
        }
        findings
    }

    /// The template every installation ships with: a shop end-of-shift
    /// report with cash-drawer totals, sectioned stock counts, handover
    /// details and optional free-form notes.
    pub fn builtin_default() -> Self {
        use InputKind::{MultilineText, NumberDecimal, Text};

        let fields = vec![
            TemplateField::field("date_field", "Date", Text),
            TemplateField::field("till_cash", "Till cash", NumberDecimal),
            TemplateField::field("till_float", "Till float", NumberDecimal),
            TemplateField::calculated("till_net", "Till net", "{till_cash} - {till_float}"),
            TemplateField::field("card_total", "Card total", NumberDecimal),
            TemplateField::calculated(
                "shift_total",
                "Shift total",
                "{till_cash} - {till_float} + {card_total}",
            ),
            TemplateField::header("header_drinks", "Drinks"),
            TemplateField::section("drinks_sold", "Sold", NumberDecimal, "header_drinks"),
            TemplateField::section("drinks_stock", "Stock", NumberDecimal, "header_drinks"),
            TemplateField::header("header_snacks", "Snacks"),
            TemplateField::section("snacks_sold", "Sold", NumberDecimal, "header_snacks"),
            TemplateField::section("snacks_stock", "Stock", NumberDecimal, "header_snacks"),
            TemplateField::header("header_produce", "Produce"),
            TemplateField::section("produce_sold", "Sold", NumberDecimal, "header_produce"),
            TemplateField::section("produce_waste", "Waste", NumberDecimal, "header_produce"),
            TemplateField::field("handover_to", "Handover to", Text),
            TemplateField::field("additional_notes", "Additional notes", MultilineText),
        ];

        let report_format = "{date_field}\n\
             Till {till_cash}   Float {till_float}   Net {till_net}\n\
             Card {card_total}\n\
             Shift total {shift_total}\n\
             Drinks\n \
             Sold {drinks_sold}.   Stock {drinks_stock}.\n\
             Snacks\n \
             Sold {snacks_sold}.   Stock {snacks_stock}.\n\
             Produce\n \
             Sold {produce_sold}.   Waste {produce_waste}.\n\
             Handover to {handover_to}\n\
             {additional_notes}\n";

        let preview_format = "Net {till_net} | Card {card_total} | Total {shift_total}";

        ReportTemplate::new(
            BUILTIN_TEMPLATE_ID,
            "Shift report",
            "The standard end-of-shift shop report",
            fields,
            report_format,
            preview_format,
        )
    }
}
