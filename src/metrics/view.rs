//! Views: rules mapping instruments to aggregation policy.
//!
//! A view selects instruments by kind, name (exact or trailing-`*`
//! wildcard), and scope name, then overrides the aggregation and/or
//! filters attribute keys. The first matching view wins; instruments with
//! no match use their kind's default aggregation.

use crate::core::{AttributeSet, MetricsError, Result};
use crate::metrics::aggregation::Aggregation;
use crate::metrics::instrument::{Instrument, InstrumentKind, InstrumentationScope};

/// Predicate over `(instrument, scope)` pairs.
#[derive(Debug, Clone, Default)]
pub struct InstrumentSelector {
    kind: Option<InstrumentKind>,
    name: Option<String>,
    scope_name: Option<String>,
}

impl InstrumentSelector {
    /// Selector matching every instrument.
    pub fn any() -> Self {
        Self::default()
    }

    /// Restrict to one instrument kind.
    pub fn with_kind(mut self, kind: InstrumentKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Restrict by instrument name; a trailing `*` matches a prefix.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Restrict by instrumentation scope name.
    pub fn with_scope_name(mut self, name: impl Into<String>) -> Self {
        self.scope_name = Some(name.into());
        self
    }

    fn matches(&self, instrument: &Instrument, scope: &InstrumentationScope) -> bool {
        if let Some(kind) = self.kind {
            if kind != instrument.kind {
                return false;
            }
        }
        if let Some(name) = &self.name {
            let matched = match name.strip_suffix('*') {
                Some(prefix) => instrument.name.starts_with(prefix),
                None => instrument.name == *name,
            };
            if !matched {
                return false;
            }
        }
        if let Some(scope_name) = &self.scope_name {
            if scope.name != *scope_name {
                return false;
            }
        }
        true
    }
}

/// Attribute transformation applied before aggregation.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum AttributeProcessor {
    /// Pass attributes through untouched
    #[default]
    Identity,
    /// Keep only the listed keys
    Filtered(Vec<String>),
}

impl AttributeProcessor {
    /// Apply the transformation.
    pub fn process(&self, attributes: AttributeSet) -> AttributeSet {
        match self {
            Self::Identity => attributes,
            Self::Filtered(keys) => attributes.retain_keys(keys),
        }
    }
}

/// A single view rule.
#[derive(Debug, Clone)]
pub struct View {
    selector: InstrumentSelector,
    aggregation: Option<Aggregation>,
    attribute_keys: Option<Vec<String>>,
}

impl View {
    /// Create a view for the selected instruments.
    pub fn new(selector: InstrumentSelector) -> Self {
        Self {
            selector,
            aggregation: None,
            attribute_keys: None,
        }
    }

    /// Override the aggregation for matching instruments.
    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = Some(aggregation);
        self
    }

    /// Keep only these attribute keys for matching instruments.
    pub fn with_attribute_keys(mut self, keys: Vec<String>) -> Self {
        self.attribute_keys = Some(keys);
        self
    }
}

/// Ordered collection of view rules.
#[derive(Debug, Clone, Default)]
pub struct ViewRegistry {
    views: Vec<View>,
}

impl ViewRegistry {
    /// Empty registry: every instrument gets its default aggregation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a view. Views are consulted in registration order.
    pub fn push(&mut self, view: View) {
        self.views.push(view);
    }

    /// Resolve the aggregation and attribute processor for an instrument.
    ///
    /// Fails with a configuration error when the first matching view
    /// carries an aggregation the instrument kind cannot support.
    pub fn resolve(
        &self,
        instrument: &Instrument,
        scope: &InstrumentationScope,
        default_boundaries: &[f64],
    ) -> Result<(Aggregation, AttributeProcessor)> {
        for view in &self.views {
            if !view.selector.matches(instrument, scope) {
                continue;
            }
            let aggregation = match &view.aggregation {
                Some(aggregation) => {
                    check_compatible(instrument.kind, aggregation)?;
                    aggregation.clone()
                },
                None => instrument.kind.default_aggregation(default_boundaries),
            };
            let processor = match &view.attribute_keys {
                Some(keys) => AttributeProcessor::Filtered(keys.clone()),
                None => AttributeProcessor::Identity,
            };
            return Ok((aggregation, processor));
        }
        Ok((
            instrument.kind.default_aggregation(default_boundaries),
            AttributeProcessor::Identity,
        ))
    }
}

fn check_compatible(kind: InstrumentKind, aggregation: &Aggregation) -> Result<()> {
    let compatible = match aggregation {
        Aggregation::Sum { monotonic } => {
            // A monotonic sum over a non-monotonic instrument would break
            // the non-decreasing guarantee.
            !*monotonic || kind.is_monotonic()
        },
        Aggregation::LastValue => matches!(
            kind,
            InstrumentKind::Gauge | InstrumentKind::ObservableGauge
        ),
        Aggregation::ExplicitBucketHistogram { boundaries, .. } => {
            let sorted = boundaries.windows(2).all(|w| w[0] < w[1]);
            if !sorted {
                return Err(MetricsError::configuration(
                    "histogram view boundaries must be strictly increasing",
                ));
            }
            matches!(kind, InstrumentKind::Histogram | InstrumentKind::Counter)
        },
    };
    if compatible {
        Ok(())
    } else {
        Err(MetricsError::configuration(format!(
            "aggregation {:?} incompatible with {} instruments",
            aggregation, kind
        )))
    }
}
