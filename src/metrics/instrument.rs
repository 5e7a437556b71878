//! Instrument descriptors and instrumentation scopes.

use crate::core::AttributeSet;
use crate::metrics::aggregation::Aggregation;
use std::fmt;

/// The seven instrument kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstrumentKind {
    /// Monotonic synchronous counter
    Counter,
    /// Non-monotonic synchronous counter
    UpDownCounter,
    /// Synchronous value distribution
    Histogram,
    /// Synchronous last-value
    Gauge,
    /// Monotonic callback-driven counter
    ObservableCounter,
    /// Non-monotonic callback-driven counter
    ObservableUpDownCounter,
    /// Callback-driven last-value
    ObservableGauge,
}

impl InstrumentKind {
    /// True for kinds whose totals never decrease.
    pub fn is_monotonic(&self) -> bool {
        matches!(self, Self::Counter | Self::ObservableCounter)
    }

    /// True for callback-driven kinds.
    pub fn is_observable(&self) -> bool {
        matches!(
            self,
            Self::ObservableCounter | Self::ObservableUpDownCounter | Self::ObservableGauge
        )
    }

    /// The aggregation applied when no view overrides it.
    pub fn default_aggregation(&self, histogram_boundaries: &[f64]) -> Aggregation {
        match self {
            Self::Counter | Self::ObservableCounter => Aggregation::Sum { monotonic: true },
            Self::UpDownCounter | Self::ObservableUpDownCounter => {
                Aggregation::Sum { monotonic: false }
            },
            Self::Histogram => Aggregation::ExplicitBucketHistogram {
                boundaries: histogram_boundaries.to_vec(),
                record_min_max: true,
            },
            Self::Gauge | Self::ObservableGauge => Aggregation::LastValue,
        }
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Counter => "counter",
            Self::UpDownCounter => "up_down_counter",
            Self::Histogram => "histogram",
            Self::Gauge => "gauge",
            Self::ObservableCounter => "observable_counter",
            Self::ObservableUpDownCounter => "observable_up_down_counter",
            Self::ObservableGauge => "observable_gauge",
        };
        f.write_str(name)
    }
}

/// Descriptor of a named, typed instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instrument {
    /// Kind of measurements this instrument produces
    pub kind: InstrumentKind,
    /// Instrument name, unique within a scope
    pub name: String,
    /// Unit of measure, e.g. "ms"
    pub unit: Option<String>,
    /// Human description
    pub description: Option<String>,
}

impl Instrument {
    /// Create a descriptor.
    pub fn new(
        kind: InstrumentKind,
        name: impl Into<String>,
        unit: Option<&str>,
        description: Option<&str>,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            unit: unit.map(str::to_owned),
            description: description.map(str::to_owned),
        }
    }

    /// Canonical identity used for deduplication.
    ///
    /// Unit separator bytes keep distinct tuples from colliding.
    pub fn identity(&self) -> String {
        format!(
            "{}\u{1f}{}\u{1f}{}\u{1f}{}",
            self.kind,
            self.name,
            self.unit.as_deref().unwrap_or(""),
            self.description.as_deref().unwrap_or(""),
        )
    }
}

/// Named and versioned instrumentation source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct InstrumentationScope {
    /// Library or component name
    pub name: String,
    /// Library version
    pub version: Option<String>,
    /// Schema URL the scope's telemetry conforms to
    pub schema_url: Option<String>,
    /// Scope-level attributes
    pub attributes: AttributeSet,
}

impl InstrumentationScope {
    /// Create a scope with just a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Canonical identity covering all four fields.
    pub fn identity(&self) -> String {
        let mut attrs = String::new();
        for (key, value) in self.attributes.iter() {
            attrs.push_str(key);
            attrs.push('=');
            attrs.push_str(&format!("{:?}", value));
            attrs.push(';');
        }
        format!(
            "{}\u{1f}{}\u{1f}{}\u{1f}{}",
            self.name,
            self.version.as_deref().unwrap_or(""),
            self.schema_url.as_deref().unwrap_or(""),
            attrs,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_kinds() {
        assert!(InstrumentKind::Counter.is_monotonic());
        assert!(InstrumentKind::ObservableCounter.is_monotonic());
        assert!(!InstrumentKind::UpDownCounter.is_monotonic());
        assert!(!InstrumentKind::Gauge.is_monotonic());
    }

    #[test]
    fn test_identity_distinguishes_fields() {
        let a = Instrument::new(InstrumentKind::Counter, "requests", Some("1"), None);
        let b = Instrument::new(InstrumentKind::Counter, "requests", None, Some("1"));
        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn test_identity_stable() {
        let a = Instrument::new(InstrumentKind::Counter, "requests", Some("ms"), Some("d"));
        let b = Instrument::new(InstrumentKind::Counter, "requests", Some("ms"), Some("d"));
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_scope_identity_includes_attributes() {
        let plain = InstrumentationScope::named("lib");
        let attributed = InstrumentationScope {
            attributes: AttributeSet::from_pairs([("tenant", "a")]),
            ..InstrumentationScope::named("lib")
        };
        assert_ne!(plain.identity(), attributed.identity());
    }

    #[test]
    fn test_default_aggregations() {
        let boundaries = [1.0, 2.0];
        assert_eq!(
            InstrumentKind::Counter.default_aggregation(&boundaries),
            Aggregation::Sum { monotonic: true }
        );
        assert_eq!(
            InstrumentKind::ObservableGauge.default_aggregation(&boundaries),
            Aggregation::LastValue
        );
        match InstrumentKind::Histogram.default_aggregation(&boundaries) {
            Aggregation::ExplicitBucketHistogram { boundaries: b, .. } => {
                assert_eq!(b, vec![1.0, 2.0])
            },
            other => panic!("unexpected {:?}", other),
        }
    }
}
