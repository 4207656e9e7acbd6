//! Stage-like units accepted by `compose` and every combinator.

use super::Pipeline;
use crate::core::Value;
use crate::stages::Stage;

/// Anything that can be placed in a pipeline: a stage, a nested pipeline, or
/// a (possibly nested) list of those.
///
/// Build units with `From`/`Into`: `Stage<T>`, `Pipeline<T>`, references to
/// either, and `Vec`s of anything convertible all qualify.
pub enum Unit<T: Value> {
    /// A single stage, used verbatim.
    Stage(Stage<T>),
    /// A nested pipeline, referenced rather than copied.
    Pipeline(Pipeline<T>),
    /// A list of units, flattened in order.
    List(Vec<Unit<T>>),
}

/// A flattened unit: something with an entry and an exit.
pub(crate) enum Element<T: Value> {
    Stage(Stage<T>),
    Pipeline(Pipeline<T>),
}

impl<T: Value> Unit<T> {
    /// An empty list, which composes to a single pass-through stage.
    #[must_use]
    pub fn empty() -> Self {
        Self::List(Vec::new())
    }

    pub(crate) fn flatten(self) -> Vec<Element<T>> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(self, out: &mut Vec<Element<T>>) {
        match self {
            Self::Stage(stage) => out.push(Element::Stage(stage)),
            Self::Pipeline(pipeline) => out.push(Element::Pipeline(pipeline)),
            Self::List(units) => {
                for unit in units {
                    unit.flatten_into(out);
                }
            }
        }
    }
}

impl<T: Value> From<Stage<T>> for Unit<T> {
    fn from(stage: Stage<T>) -> Self {
        Self::Stage(stage)
    }
}

impl<T: Value> From<&Stage<T>> for Unit<T> {
    fn from(stage: &Stage<T>) -> Self {
        Self::Stage(stage.clone())
    }
}

impl<T: Value> From<Pipeline<T>> for Unit<T> {
    fn from(pipeline: Pipeline<T>) -> Self {
        Self::Pipeline(pipeline)
    }
}

impl<T: Value> From<&Pipeline<T>> for Unit<T> {
    fn from(pipeline: &Pipeline<T>) -> Self {
        Self::Pipeline(pipeline.clone())
    }
}

impl<T: Value, U: Into<Unit<T>>> From<Vec<U>> for Unit<T> {
    fn from(units: Vec<U>) -> Self {
        Self::List(units.into_iter().map(Into::into).collect())
    }
}
