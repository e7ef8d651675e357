//! Pass-through of upstream Prometheus bodies
//!
//! Forwarder resources are not path-evaluated. Their body is parsed as text
//! exposition, every sample is stamped with the owning service's `job` and
//! `instance`, and the families are spliced into the scrape output.
//!
//! An upstream label already called `job` or `instance` is kept as
//! `exported_job` / `exported_instance`, so each sample carries exactly one
//! identity pair. Families named like the exporter's own self-metrics get the
//! same treatment (`exported_scrape_duration_seconds`), so chaining one
//! exporter behind another never yields a second `# TYPE` for those names.

use crate::config::Service;
use crate::document::{DecodeError, MetricFamily, exposition};
use crate::observability::SELF_METRIC_NAMES;

pub use exposition::families_missing_label;

/// Parse a forwarded body and attach the service identity to every sample
pub fn relabel(body: &[u8], service: &Service) -> Result<Vec<MetricFamily>, DecodeError> {
    let mut families = exposition::parse_bytes(body)?;
    rename_reserved(&mut families);
    let instance = service.instance();
    exposition::inject_labels(
        &mut families,
        &[("job", service.name.as_str()), ("instance", instance.as_str())],
    );
    Ok(families)
}

/// Move families that clash with self-metric names under `exported_<name>`
fn rename_reserved(families: &mut [MetricFamily]) {
    for family in families
        .iter_mut()
        .filter(|f| SELF_METRIC_NAMES.contains(&f.name.as_str()))
    {
        let renamed = format!("exported_{}", family.name);
        for sample in &mut family.samples {
            if let Some(suffix) = sample.name.strip_prefix(family.name.as_str()) {
                sample.name = format!("{renamed}{suffix}");
            }
        }
        family.name = renamed;
    }
}
