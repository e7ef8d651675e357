//! Prometheus text exposition format
//!
//! Parsing, encoding and label rewriting for version 0.0.4 text bodies.
//! The same family model carries forwarded upstream metrics and the
//! metrics shaped from api resources, so both go through [`encode`].

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use super::{DecodeError, Decoder, Node};

/// Suffixes that attach a sample to the family of its base name
const FAMILY_SUFFIXES: &[&str] = &["_bucket", "_sum", "_count", "_total", "_created"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Summary,
    #[default]
    Untyped,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Summary => "summary",
            MetricKind::Untyped => "untyped",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "counter" => MetricKind::Counter,
            "gauge" => MetricKind::Gauge,
            "histogram" => MetricKind::Histogram,
            "summary" => MetricKind::Summary,
            _ => MetricKind::Untyped,
        }
    }
}

/// One sample line
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub labels: Vec<(String, String)>,
    pub value: f64,
    pub timestamp: Option<i64>,
}

impl Sample {
    pub fn new(name: impl Into<String>, labels: Vec<(String, String)>, value: f64) -> Self {
        Self {
            name: name.into(),
            labels,
            value,
            timestamp: None,
        }
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub help: Option<String>,
    pub kind: MetricKind,
    pub samples: Vec<Sample>,
}

impl MetricFamily {
    pub fn new(name: impl Into<String>, help: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            help: Some(help.into()),
            kind,
            samples: Vec::new(),
        }
    }

    fn untyped(name: &str) -> Self {
        Self {
            name: name.to_string(),
            help: None,
            kind: MetricKind::Untyped,
            samples: Vec::new(),
        }
    }

    fn owns(&self, sample_name: &str) -> bool {
        sample_name == self.name
            || FAMILY_SUFFIXES.iter().any(|suffix| {
                sample_name
                    .strip_suffix(suffix)
                    .is_some_and(|base| base == self.name)
            })
    }
}

pub fn parse_bytes(body: &[u8]) -> Result<Vec<MetricFamily>, DecodeError> {
    let text = std::str::from_utf8(body)
        .map_err(|e| DecodeError::new(Decoder::Prometheus, e.to_string(), body))?;
    parse(text)
}

/// Parse an exposition body into families, in order of first appearance
pub fn parse(text: &str) -> Result<Vec<MetricFamily>, DecodeError> {
    let mut families: Vec<MetricFamily> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut current: Option<usize> = None;

    let fail = |line_no: usize, reason: String| {
        DecodeError::new(
            Decoder::Prometheus,
            format!("line {}: {}", line_no + 1, reason),
            text.as_bytes(),
        )
    };

    for (line_no, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(comment) = line.strip_prefix('#') {
            let mut parts = comment.trim_start().splitn(3, char::is_whitespace);
            let keyword = parts.next().unwrap_or_default();
            if keyword != "HELP" && keyword != "TYPE" {
                continue;
            }
            let name = parts
                .next()
                .filter(|n| !n.is_empty())
                .ok_or_else(|| fail(line_no, format!("{keyword} without metric name")))?;
            let rest = parts.next().unwrap_or_default().trim();

            let idx = *index.entry(name.to_string()).or_insert_with(|| {
                families.push(MetricFamily::untyped(name));
                families.len() - 1
            });
            if keyword == "HELP" {
                families[idx].help = Some(unescape_help(rest));
            } else {
                families[idx].kind = MetricKind::parse(rest);
            }
            current = Some(idx);
            continue;
        }

        let sample = parse_sample(line).map_err(|reason| fail(line_no, reason))?;

        let idx = match current {
            Some(idx) if families[idx].owns(&sample.name) => idx,
            _ => *index.entry(sample.name.clone()).or_insert_with(|| {
                families.push(MetricFamily::untyped(&sample.name));
                families.len() - 1
            }),
        };
        current = Some(idx);
        families[idx].samples.push(sample);
    }

    Ok(families)
}

fn parse_sample(line: &str) -> Result<Sample, String> {
    let name_end = line
        .find(|c: char| c == '{' || c.is_whitespace())
        .ok_or_else(|| format!("sample without value: '{line}'"))?;
    let name = &line[..name_end];
    if name.is_empty() {
        return Err(format!("sample without name: '{line}'"));
    }

    let mut rest = &line[name_end..];
    let mut labels = Vec::new();
    if rest.starts_with('{') {
        let (parsed, remainder) = parse_labels(&rest[1..])?;
        labels = parsed;
        rest = remainder;
    }

    let mut fields = rest.split_whitespace();
    let value = fields
        .next()
        .ok_or_else(|| format!("sample '{name}' has no value"))
        .and_then(parse_value)?;
    let timestamp = fields
        .next()
        .map(|ts| {
            ts.parse::<i64>()
                .map_err(|_| format!("invalid timestamp '{ts}'"))
        })
        .transpose()?;

    Ok(Sample {
        name: name.to_string(),
        labels,
        value,
        timestamp,
    })
}

/// Parse `a="x",b="y"}` and return the labels plus the text after `}`
fn parse_labels(input: &str) -> Result<(Vec<(String, String)>, &str), String> {
    let mut labels = Vec::new();
    let mut rest = input;

    loop {
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix('}') {
            return Ok((labels, after));
        }

        let eq = rest
            .find('=')
            .ok_or_else(|| "label without '='".to_string())?;
        let name = rest[..eq].trim().to_string();
        rest = rest[eq + 1..].trim_start();
        rest = rest
            .strip_prefix('"')
            .ok_or_else(|| format!("label '{name}' value is not quoted"))?;

        let mut value = String::new();
        let mut chars = rest.char_indices();
        let end = loop {
            match chars.next() {
                Some((i, '"')) => break i,
                Some((_, '\\')) => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, c)) => value.push(c),
                    None => return Err(format!("unterminated value for label '{name}'")),
                },
                Some((_, c)) => value.push(c),
                None => return Err(format!("unterminated value for label '{name}'")),
            }
        };
        labels.push((name, value));

        rest = rest[end + 1..].trim_start();
        if let Some(after) = rest.strip_prefix(',') {
            rest = after;
        } else if !rest.starts_with('}') {
            return Err("expected ',' or '}' after label value".to_string());
        }
    }
}

fn parse_value(raw: &str) -> Result<f64, String> {
    match raw {
        "+Inf" | "Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        "NaN" => Ok(f64::NAN),
        _ => raw
            .parse::<f64>()
            .map_err(|_| format!("invalid sample value '{raw}'")),
    }
}

fn unescape_help(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}

/// Render families as exposition text
pub fn encode(families: &[MetricFamily], out: &mut String) {
    for family in families {
        if let Some(help) = &family.help {
            let help = help.replace('\\', "\\\\").replace('\n', "\\n");
            let _ = writeln!(out, "# HELP {} {}", family.name, help);
        }
        let _ = writeln!(out, "# TYPE {} {}", family.name, family.kind.as_str());

        for sample in &family.samples {
            out.push_str(&sample.name);
            if !sample.labels.is_empty() {
                out.push('{');
                for (i, (name, value)) in sample.labels.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    let value = value
                        .replace('\\', "\\\\")
                        .replace('"', "\\\"")
                        .replace('\n', "\\n");
                    let _ = write!(out, "{name}=\"{value}\"");
                }
                out.push('}');
            }
            let _ = write!(out, " {}", format_value(sample.value));
            if let Some(ts) = sample.timestamp {
                let _ = write!(out, " {ts}");
            }
            out.push('\n');
        }
    }
}

/// Append identity labels to every sample.
///
/// An existing label with the same name is kept under `exported_<name>`,
/// so each sample ends up with exactly one pair per identity label.
pub fn inject_labels(families: &mut [MetricFamily], identity: &[(&str, &str)]) {
    for sample in families.iter_mut().flat_map(|f| f.samples.iter_mut()) {
        for (key, value) in identity {
            for (existing, _) in sample.labels.iter_mut() {
                if existing == key {
                    *existing = format!("exported_{key}");
                }
            }
            sample.labels.push((key.to_string(), value.to_string()));
        }
    }
}

/// Names of the families with at least one sample lacking `label`
pub fn families_missing_label(families: &[MetricFamily], label: &str) -> Vec<String> {
    families
        .iter()
        .filter(|f| f.samples.iter().any(|s| s.label(label).is_none()))
        .map(|f| f.name.clone())
        .collect()
}

/// Tree view of parsed families so api resources can path-evaluate them:
/// `/<family>/{type,help,samples/<i>/{name,value,labels/<label>}}`
pub fn to_node(families: &[MetricFamily]) -> Node {
    let map = families
        .iter()
        .map(|family| {
            let samples = family
                .samples
                .iter()
                .map(|s| {
                    let labels = s
                        .labels
                        .iter()
                        .map(|(k, v)| (k.clone(), Node::String(v.clone())))
                        .collect::<BTreeMap<_, _>>();
                    Node::Map(BTreeMap::from([
                        ("name".to_string(), Node::String(s.name.clone())),
                        ("value".to_string(), Node::Number(s.value)),
                        ("labels".to_string(), Node::Map(labels)),
                    ]))
                })
                .collect();

            let mut entry = BTreeMap::from([
                ("type".to_string(), Node::String(family.kind.as_str().to_string())),
                ("samples".to_string(), Node::Sequence(samples)),
            ]);
            if let Some(help) = &family.help {
                entry.insert("help".to_string(), Node::String(help.clone()));
            }
            (family.name.clone(), Node::Map(entry))
        })
        .collect();

    Node::Map(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"# HELP http_requests_total Total requests.
# TYPE http_requests_total counter
http_requests_total{method="post",code="200"} 1027 1395066363000
http_requests_total{method="post",code="400"}    3 1395066363000

# A normal comment.
# TYPE rpc_duration_seconds histogram
rpc_duration_seconds_bucket{le="0.05"} 24054
rpc_duration_seconds_bucket{le="+Inf"} 144320
rpc_duration_seconds_sum 53423
rpc_duration_seconds_count 144320
plain_metric 3.5
escaped{path="C:\\DIR\\",msg="say \"hi\"\n"} 1
"#;

    #[test]
    fn test_parse_families() {
        let families = parse(BODY).unwrap();
        let names: Vec<_> = families.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            ["http_requests_total", "rpc_duration_seconds", "plain_metric", "escaped"]
        );

        let requests = &families[0];
        assert_eq!(requests.kind, MetricKind::Counter);
        assert_eq!(requests.help.as_deref(), Some("Total requests."));
        assert_eq!(requests.samples.len(), 2);
        assert_eq!(requests.samples[1].value, 3.0);
        assert_eq!(requests.samples[1].label("code"), Some("400"));
        assert_eq!(requests.samples[0].timestamp, Some(1395066363000));

        let rpc = &families[1];
        assert_eq!(rpc.kind, MetricKind::Histogram);
        assert_eq!(rpc.samples.len(), 4);
        assert_eq!(rpc.samples[1].label("le"), Some("+Inf"));

        assert_eq!(families[2].kind, MetricKind::Untyped);
        assert_eq!(families[3].samples[0].label("path"), Some("C:\\DIR\\"));
        assert_eq!(families[3].samples[0].label("msg"), Some("say \"hi\"\n"));
    }

    #[test]
    fn test_parse_special_values() {
        let families = parse("a +Inf\nb -Inf\nc NaN\n").unwrap();
        assert_eq!(families[0].samples[0].value, f64::INFINITY);
        assert_eq!(families[1].samples[0].value, f64::NEG_INFINITY);
        assert!(families[2].samples[0].value.is_nan());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse("metric_without_value\n").is_err());
        assert!(parse("m{a=\"x\" 1\n").is_err());
        assert!(parse("m{a=x} 1\n").is_err());
        assert!(parse("m one\n").is_err());
    }

    #[test]
    fn test_encode_reparses_identically() {
        let families = parse(BODY).unwrap();
        let mut text = String::new();
        encode(&families, &mut text);
        assert!(text.contains("http_requests_total{method=\"post\",code=\"200\"} 1027 1395066363000\n"));
        assert!(text.contains("rpc_duration_seconds_bucket{le=\"+Inf\"} 144320\n"));
        assert!(text.contains("escaped{path=\"C:\\\\DIR\\\\\",msg=\"say \\\"hi\\\"\\n\"} 1\n"));
        assert_eq!(parse(&text).unwrap(), families);
    }

    #[test]
    fn test_inject_labels_appends_identity() {
        let mut families = parse("foo_total 3\n").unwrap();
        inject_labels(&mut families, &[("job", "svcA"), ("instance", "10.0.0.1:9000")]);

        let mut text = String::new();
        encode(&families, &mut text);
        assert!(text.contains("foo_total{job=\"svcA\",instance=\"10.0.0.1:9000\"} 3\n"));
        assert!(families_missing_label(&families, "job").is_empty());
        assert!(families_missing_label(&families, "instance").is_empty());
    }

    #[test]
    fn test_inject_labels_keeps_upstream_identity() {
        let mut families = parse("up{job=\"node\",zone=\"a\"} 1\n").unwrap();
        inject_labels(&mut families, &[("job", "svcA"), ("instance", "h:1")]);

        let sample = &families[0].samples[0];
        assert_eq!(sample.label("exported_job"), Some("node"));
        assert_eq!(sample.label("zone"), Some("a"));
        assert_eq!(sample.label("job"), Some("svcA"));
        assert_eq!(sample.labels.iter().filter(|(k, _)| k == "job").count(), 1);
    }

    #[test]
    fn test_families_missing_label() {
        let families = parse("a{job=\"x\"} 1\nb 2\nc{job=\"y\"} 1\nc 4\n").unwrap();
        assert_eq!(families_missing_label(&families, "job"), ["b", "c"]);
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(3.0), "3");
        assert_eq!(format_value(0.25), "0.25");
        assert_eq!(format_value(f64::INFINITY), "+Inf");
        assert_eq!(format_value(f64::NAN), "NaN");
    }
}
