use shift_report::{
    FormItem, ReportForm, ReportStore, TemplateRegistry, BUILTIN_TEMPLATE_ID,
};

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let data_dir = if args.len() >= 2 {
        PathBuf::from(&args[1])
    } else {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shift-report")
    };

    let mut registry = TemplateRegistry::open(&data_dir)?;
    let mut store = ReportStore::open(data_dir.join("reports.bin.gz"))?;

    println!("shift-report — data in {}", data_dir.display());
    let mut status = String::from("ok");
    loop {
        print!("({status}) > ");
        io::stdout().flush()?;

        let mut command = String::new();
        if io::stdin().read_line(&mut command).is_err() || command.is_empty() {
            break;
        }
        let command = command.trim();

        if command.is_empty() {
            status = String::from("invalid command");
            continue;
        }

        if command == "help" {
            println!("Commands:");
            println!("  q: Quit");
            println!("  list: List saved reports, most recent first");
            println!("  new: Start a report from the default template");
            println!("  open <id>: Re-open a saved report");
            println!("  delete <id>: Delete a saved report");
            println!("  templates: List available templates");
            println!("  import <path>: Import a template JSON file");
            println!("  set-default <template_id>: Default template for new reports");
            println!("  delete-template <template_id>: Delete an imported template");
            continue;
        }

        if command == "q" {
            break;
        } else if command == "list" {
            let reports = store.list();
            if reports.is_empty() {
                println!("No saved reports.");
            }
            for report in reports {
                println!(
                    "#{}  {}  [{}]  {}",
                    report.id, report.title, report.last_edited_at, report.preview_text
                );
            }
            status = String::from("ok");
        } else if command == "new" {
            let mut form = ReportForm::new(registry.current_template().clone());
            status = run_form(&mut form, &mut store);
        } else if let Some(rest) = command.strip_prefix("open ") {
            match rest.trim().parse::<i64>().ok().and_then(|id| store.get(id)) {
                Some(record) => {
                    let mut form = ReportForm::open(record, &registry);
                    status = run_form(&mut form, &mut store);
                }
                None => status = String::from("no such report"),
            }
        } else if let Some(rest) = command.strip_prefix("delete-template ") {
            let template_id = rest.trim();
            status = match registry
                .delete(template_id, |id| store.has_reports_using_template(id))
            {
                Ok(()) => String::from("ok"),
                Err(err) => err.to_string(),
            };
        } else if let Some(rest) = command.strip_prefix("delete ") {
            status = match rest.trim().parse::<i64>() {
                Ok(id) => match store.delete(id) {
                    Ok(()) => String::from("ok"),
                    Err(err) => err.to_string(),
                },
                Err(_) => String::from("invalid report id"),
            };
        } else if command == "templates" {
            let mut templates = registry.list();
            templates.sort_by_key(|t| {
                (t.template_id() != BUILTIN_TEMPLATE_ID, t.name().to_lowercase())
            });
            for template in templates {
                let marker = if template.template_id() == registry.default_template_id() {
                    " (default for new reports)"
                } else {
                    ""
                };
                println!(
                    "{}  [{}]{}  {}",
                    template.name(),
                    template.template_id(),
                    marker,
                    template.description()
                );
            }
            status = String::from("ok");
        } else if let Some(rest) = command.strip_prefix("import ") {
            status = match fs::read(rest.trim()) {
                Ok(bytes) => match registry.import(&bytes) {
                    Ok(id) => format!("imported {id}"),
                    Err(err) => err.to_string(),
                },
                Err(err) => err.to_string(),
            };
        } else if let Some(rest) = command.strip_prefix("set-default ") {
            let template_id = rest.trim();
            status = if registry.get(template_id).is_some() {
                match registry.set_default_template_id(template_id) {
                    Ok(()) => String::from("ok"),
                    Err(err) => err.to_string(),
                }
            } else {
                String::from("no such template")
            };
        } else {
            status = String::from("invalid command");
        }
    }

    Ok(())
}

/// One form-editing session. Returns the status for the outer prompt.
/// Leaving the session auto-saves, unless the report is new and still empty.
fn run_form(form: &mut ReportForm, store: &mut ReportStore) -> String {
    println!(
        "Editing \"{}\" — `show` to display, `help` for commands",
        form.title().unwrap_or("untitled")
    );
    print_form(form);

    let mut status = String::from("ok");
    loop {
        print!("[form {status}] > ");
        if io::stdout().flush().is_err() {
            break;
        }

        let mut command = String::new();
        if io::stdin().read_line(&mut command).is_err() || command.is_empty() {
            break;
        }
        let command = command.trim();

        if command == "help" {
            println!("Form commands:");
            println!("  show: Display all fields");
            println!("  <field_id>=<value>: Set a field");
            println!("  title <text>: Rename the report");
            println!("  preview: Show the one-line preview");
            println!("  text: Show the shareable report text");
            println!("  save: Save without validation");
            println!("  send: Validate, save and print the report text");
            println!("  back: Leave the form (auto-saves)");
            continue;
        }

        if command == "back" || command == "q" {
            if form.has_content() || form.report_id().is_some() {
                status = save_form(form, store);
            }
            break;
        } else if command == "show" {
            print_form(form);
            status = String::from("ok");
        } else if command == "preview" {
            println!("{}", form.render_preview());
            status = String::from("ok");
        } else if command == "text" {
            println!("{}", form.render_share_text());
            status = String::from("ok");
        } else if let Some(rest) = command.strip_prefix("title ") {
            let title = rest.trim();
            if title.is_empty() {
                status = String::from("title cannot be empty");
            } else {
                form.set_title(title);
                status = String::from("ok");
            }
        } else if command == "save" {
            status = save_form(form, store);
        } else if command == "send" {
            form.clear_errors();
            let missing = form.validate_for_submission();
            if missing.is_empty() {
                status = save_form(form, store);
                println!("{}", form.render_share_text());
            } else {
                form.mark_errors(&missing);
                print_form(form);
                status = format!("{} field(s) still empty", missing.len());
            }
        } else if let Some(equal_pos) = command.find('=') {
            let field_id = command[..equal_pos].trim();
            let value = command[equal_pos + 1..].trim();
            let editable = form
                .item(field_id)
                .map(|item| item.as_field().is_some_and(|f| f.is_editable()));
            match editable {
                Some(true) => {
                    form.set_field_value(field_id, value);
                    status = String::from("ok");
                }
                Some(false) => status = String::from("field is not editable"),
                None => status = String::from("no such field"),
            }
        } else {
            status = String::from("invalid command");
        }
    }
    status
}

fn save_form(form: &mut ReportForm, store: &mut ReportStore) -> String {
    match form.save(store) {
        Ok(id) => format!("saved #{id}"),
        Err(err) => err.to_string(),
    }
}

fn print_form(form: &ReportForm) {
    for item in form.items() {
        match item {
            FormItem::Header(header) => println!("== {} ==", header.display_label()),
            FormItem::Field(field) | FormItem::Section(field) => {
                let indent = if field.parent_section_id().is_some() { "  " } else { "" };
                let marker = if field.is_calculated() {
                    " (calculated)"
                } else if field.error {
                    " (!)"
                } else {
                    ""
                };
                println!(
                    "{indent}{} [{}]{}: {}",
                    field.display_label(),
                    field.internal_id(),
                    marker,
                    field.value
                );
            }
        }
    }
}
