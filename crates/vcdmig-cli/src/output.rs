use vcdmig_migrate::{Change, MigrationReport};

/// Render the run report as human-readable text.
pub fn render_report(report: &MigrationReport) -> String {
    let mut out = String::new();
    for change in &report.changes {
        let line = match change {
            Change::Created { object_type, name, .. } => format!("+ {} {}", object_type, name),
            Change::Skipped { object_type, name, reason } => {
                format!("= {} {} ({})", object_type, name, reason)
            }
            Change::Edited { object_type, name } => format!("~ {} {}", object_type, name),
            Change::ServicesReapplied { name } => format!("~ edge_gateway {} (services)", name),
            Change::StorageProfilesProvisioned { vdc, profiles, default } => {
                format!("  storage profiles on {}: {} (default {})", vdc, profiles.join(", "), default)
            }
        };
        out.push_str(&line);
        out.push('\n');
    }
    out.push_str(&format!(
        "{} created, {} skipped.",
        report.created_count(),
        report.skipped_count()
    ));
    if let Some(finished) = report.finished_at {
        let secs = (finished - report.started_at).num_seconds();
        out.push_str(&format!(" ({}s)", secs));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcdmig_domain::ObjectType;

    #[test]
    fn text_summary_lists_changes_then_totals() {
        let mut report = MigrationReport::new();
        report.record(Change::Created {
            object_type: ObjectType::Organization,
            name:        "Acme".into(),
            href:        "https://t/api/admin/org/1".into(),
        });
        report.record(Change::StorageProfilesProvisioned {
            vdc:      "Acme-VDC".into(),
            profiles: vec!["Gold".into(), "Silver".into()],
            default:  "Gold".into(),
        });
        report.record(Change::Skipped {
            object_type: ObjectType::Role,
            name:        "Operator".into(),
            reason:      "already exists on the target".into(),
        });

        let text = render_report(&report);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "+ organization Acme");
        assert_eq!(lines[1], "  storage profiles on Acme-VDC: Gold, Silver (default Gold)");
        assert_eq!(lines[2], "= role Operator (already exists on the target)");
        assert_eq!(lines[3], "1 created, 1 skipped.");
    }
}
