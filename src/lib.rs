/*!
# Shift Report

A template-driven engine for recurring end-of-shift shop reports, built in
Rust.

## Overview

A shop employee fills out the same numeric report at the end of every shift:
cash totals, stock counts per category, handover notes. This crate models
that report as a user-customizable template and turns the template into a
live form with dependency-tracked calculated fields and shareable text
output. Multiple filled reports are kept in a local store and can be
reopened and re-edited later.

## Architecture

### Core Engine
- Template Schema — declarative field/header/section definitions plus the
  two `{placeholder}` output formats
- Expression Evaluator — flat `+ - * /` arithmetic, two-pass left-to-right
  collapse (deliberately not precedence-climbing)
- Placeholder Substitution — format strings parsed once into
  literal/reference segments, rendered in a single pass
- Dependency Graph — reverse index from a field to the calculated fields
  that must be recomputed when it changes
- Recalculation Engine — single-level propagation on every edit; a bad
  input turns the one affected field into `"Error"`, never a failure of the
  whole form

### Persistence Layer
- Template registry — a directory of imported template JSON files plus the
  always-present built-in default, and the default-for-new-reports
  preference
- Report store — saved reports in one gzip-compressed bincode file,
  monotonic ids, most-recently-edited-first listing

## Modules

- **template**: template schema, the built-in default template, lint
- **formula**: the expression evaluator and the placeholder machinery
- **form**: runtime form items, dependency map, recalculation, validation,
  report text rendering
- **registry**: template registry and preferences
- **store**: saved-report persistence

## Usage

```no_run
use shift_report::{ReportForm, ReportStore, TemplateRegistry};

let registry = TemplateRegistry::open("data")?;
let mut store = ReportStore::open("data/reports.bin.gz")?;

let mut form = ReportForm::new(registry.current_template().clone());
form.set_field_value("till_cash", "250.50");
form.set_field_value("till_float", "50");

let missing = form.validate_for_submission();
if missing.is_empty() {
    form.save(&mut store)?;
    println!("{}", form.render_share_text());
}
# Ok::<(), Box<dyn std::error::Error>>(())
```
*/

pub mod form;
pub mod formula;
pub mod registry;
pub mod store;
pub mod template;

pub use form::*;
pub use formula::*;
pub use registry::*;
pub use store::*;
pub use template::*;
