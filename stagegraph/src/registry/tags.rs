//! Stage tags and the reserved non-pipeline node types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tag of a stage that can appear in a compiled pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StageTag {
    /// 2D convolution.
    Conv2d,
    /// 2D max pooling.
    MaxPooling2d,
    /// 2D average pooling.
    AvgPooling2d,
    /// Collapse all dimensions into one.
    Flatten,
    /// Fully connected layer.
    Dense,
    /// Dropout regularization.
    Dropout,
    /// Batch normalization.
    BatchNorm,
    /// Standalone activation function.
    Activation,
    /// Long short-term memory recurrent layer.
    Lstm,
    /// Gated recurrent unit layer.
    Gru,
    /// Reshape to a target shape.
    Reshape,
}

impl StageTag {
    /// Every known stage tag.
    pub const ALL: [Self; 11] = [
        Self::Conv2d,
        Self::MaxPooling2d,
        Self::AvgPooling2d,
        Self::Flatten,
        Self::Dense,
        Self::Dropout,
        Self::BatchNorm,
        Self::Activation,
        Self::Lstm,
        Self::Gru,
        Self::Reshape,
    ];

    /// Returns the wire name used by the design tool.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conv2d => "conv2d",
            Self::MaxPooling2d => "maxPooling2d",
            Self::AvgPooling2d => "avgPooling2d",
            Self::Flatten => "flatten",
            Self::Dense => "dense",
            Self::Dropout => "dropout",
            Self::BatchNorm => "batchNorm",
            Self::Activation => "activation",
            Self::Lstm => "lstm",
            Self::Gru => "gru",
            Self::Reshape => "reshape",
        }
    }

    /// Looks up a tag by wire name.
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| tag.as_str() == name)
    }

    /// Human readable description used in structural summaries.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Conv2d => "2D convolution",
            Self::MaxPooling2d => "max pooling",
            Self::AvgPooling2d => "average pooling",
            Self::Flatten => "flatten",
            Self::Dense => "fully connected",
            Self::Dropout => "dropout regularization",
            Self::BatchNorm => "batch normalization",
            Self::Activation => "activation function",
            Self::Lstm => "long short-term memory",
            Self::Gru => "gated recurrent unit",
            Self::Reshape => "reshape",
        }
    }
}

impl fmt::Display for StageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node types the design tool uses for data sources and triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReservedTag {
    /// Tabular data source.
    UseData,
    /// MNIST image data source.
    Mnist,
    /// The "train" trigger button.
    TrainButton,
}

impl ReservedTag {
    /// Returns the wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UseData => "useData",
            Self::Mnist => "mnist",
            Self::TrainButton => "trainButton",
        }
    }

    /// Looks up a reserved tag by wire name.
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        [Self::UseData, Self::Mnist, Self::TrainButton]
            .into_iter()
            .find(|tag| tag.as_str() == name)
    }
}

/// What a raw node `type` string refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A pipeline stage.
    Stage(StageTag),
    /// A data-source or trigger marker, excluded from compilation.
    Reserved(ReservedTag),
    /// Anything else.
    Unknown(String),
}

impl NodeKind {
    /// Classifies a raw type string.
    #[must_use]
    pub fn classify(name: &str) -> Self {
        if let Some(tag) = StageTag::from_wire(name) {
            Self::Stage(tag)
        } else if let Some(reserved) = ReservedTag::from_wire(name) {
            Self::Reserved(reserved)
        } else {
            Self::Unknown(name.to_string())
        }
    }

    /// Returns the wire name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Stage(tag) => tag.as_str(),
            Self::Reserved(tag) => tag.as_str(),
            Self::Unknown(name) => name,
        }
    }
}
