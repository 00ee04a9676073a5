//! Terminal diagnostics

use std::fs;
use std::ops::Range;

use ariadne::{Color, Label, Report, ReportKind, Source};
use scriptc_resolve::{ResolveError, UnitArena, UnresolvedReference};
use tracing::warn;

use crate::error::BuildError;

/// Report names that resolved to nothing.
///
/// References with a location in a readable file get a source snippet;
/// everything else is a one-line warning.
pub fn report_unresolved(units: &UnitArena, references: &[UnresolvedReference]) {
    for reference in references {
        let Some(unit) = units.get(reference.unit) else {
            continue;
        };
        let located = reference.span.and_then(|span| {
            let path = unit.source_path()?;
            let source = fs::read_to_string(path).ok()?;
            Some((path.display().to_string(), source, span.range()))
        });

        match located {
            Some((filename, source, range)) => render(
                ReportKind::Warning,
                Color::Yellow,
                "W0001",
                "Unresolved function",
                &format!("`{}` is not defined on the search path", reference.name),
                range,
                &filename,
                &source,
            ),
            None => eprintln!(
                "warning: `{}` used in {} is not defined on the search path",
                reference.name, unit
            ),
        }
    }
}

/// Print a fatal build error, with source context for syntax errors
pub fn report_error(error: &BuildError) {
    if let BuildError::Resolve(ResolveError::Syntax {
        origin,
        span,
        message,
    }) = error
    {
        if let Ok(source) = fs::read_to_string(origin) {
            render(
                ReportKind::Error,
                Color::Red,
                "E0001",
                "Syntax error",
                message,
                span.range(),
                origin,
                &source,
            );
            return;
        }
    }
    eprintln!("error: {}", error);
}

#[allow(clippy::too_many_arguments)]
fn render(
    kind: ReportKind<'_>,
    color: Color,
    code: &str,
    title: &str,
    message: &str,
    range: Range<usize>,
    filename: &str,
    source: &str,
) {
    let span = (filename, range);
    let printed = Report::build(kind, span.clone())
        .with_code(code)
        .with_message(title)
        .with_label(Label::new(span).with_message(message).with_color(color))
        .finish()
        .eprint((filename, Source::from(source)));
    if let Err(e) = printed {
        warn!(error = %e, "failed to render diagnostic");
    }
}
