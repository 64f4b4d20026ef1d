/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

use chrono::Local;
use std::fmt;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{format, FmtContext, FormatEvent, FormatFields, FormattedFields};
use tracing_subscriber::registry::LookupSpan;

/// Single-line event formatter:
/// `timestamp LEVEL span.path(fields) target: message`.
///
/// The span path reads like a call path (`server.request`), with each
/// span's fields inlined in parentheses where they were recorded.
pub struct PipeDnsLogFormatter;

impl<S, N> FormatEvent<S, N> for PipeDnsLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(
            writer,
            "{} {:>5} ",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            metadata.level()
        )?;

        let mut in_scope = false;
        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                if in_scope {
                    writer.write_str(".")?;
                }
                writer.write_str(span.name())?;
                in_scope = true;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "({fields})")?;
                    }
                }
            }
        }
        if in_scope {
            writer.write_str(" ")?;
        }

        write!(writer, "{}: ", metadata.target())?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}
