// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The workload file format.
//!
//! A text, line-based format:
//!
//! ```text
//! HYBRID_TRANSFORMER model_parallel_NPU_group: 8 checkpoints: 2 0 4
//! 3
//! mlp0 -1 100 ALLGATHER 4096 120 REDUCESCATTER 4096 80 ALLREDUCE 4096 10
//! ...
//! ```
//!
//! Line one is the header: the parallelisation policy followed by optional
//! `key: value` attributes. Line two is the layer count, then one line per
//! layer: name, a reserved field, and per training phase the compute
//! cycles, collective kind and message bytes, ending with the weight-update
//! time. Collective kinds may carry an `_EP` or `_DP_EP` suffix selecting
//! the expert-parallel group.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use mainline_collectives::op::CollectiveOp;
use mainline_engine::sim_error;
use mainline_engine::types::{Bytes, Cycles, SimError};

/// The parallelisation strategy named in the header.
///
/// The strategy mostly rides along for reporting: the layer lines carry the
/// actual compute and communication. Two variants change control flow -
/// `HybridTransformerFwdInBckwd` enables activation recomputation and
/// `DistributedInference` runs forward passes only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ParallelismPolicy {
    Data,
    HybridTransformer,
    HybridTransformerFwdInBckwd,
    HybridDlrm,
    HybridDlrmEnhanced,
    Model,
    HybridDataModel,
    HybridModelData,
    HybridCustomized,
    Micro,
    DistributedInference,
}

impl ParallelismPolicy {
    /// Parse the header spelling.
    pub fn parse(raw: &str) -> Result<Self, SimError> {
        match raw {
            "DATA" => Ok(Self::Data),
            "HYBRID_TRANSFORMER" => Ok(Self::HybridTransformer),
            "HYBRID_TRANSFORMER_FWD_IN_BCKWD" => Ok(Self::HybridTransformerFwdInBckwd),
            "HYBRID_DLRM" => Ok(Self::HybridDlrm),
            "HYBRID_DLRM_ENHANCED" => Ok(Self::HybridDlrmEnhanced),
            "MODEL" => Ok(Self::Model),
            "HYBRID_DATA_MODEL" => Ok(Self::HybridDataModel),
            "HYBRID_MODEL_DATA" => Ok(Self::HybridModelData),
            "HYBRID_CUSTOMIZED" => Ok(Self::HybridCustomized),
            "MICRO" => Ok(Self::Micro),
            "DISTRIBUTED_INFERENCE" => Ok(Self::DistributedInference),
            _ => sim_error!("unknown parallelisation policy '{raw}'"),
        }
    }

    /// Whether the policy runs a forward pass only.
    #[must_use]
    pub fn forward_only(self) -> bool {
        self == Self::DistributedInference
    }
}

impl fmt::Display for ParallelismPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            Self::Data => "DATA",
            Self::HybridTransformer => "HYBRID_TRANSFORMER",
            Self::HybridTransformerFwdInBckwd => "HYBRID_TRANSFORMER_FWD_IN_BCKWD",
            Self::HybridDlrm => "HYBRID_DLRM",
            Self::HybridDlrmEnhanced => "HYBRID_DLRM_ENHANCED",
            Self::Model => "MODEL",
            Self::HybridDataModel => "HYBRID_DATA_MODEL",
            Self::HybridModelData => "HYBRID_MODEL_DATA",
            Self::HybridCustomized => "HYBRID_CUSTOMIZED",
            Self::Micro => "MICRO",
            Self::DistributedInference => "DISTRIBUTED_INFERENCE",
        };
        write!(f, "{text}")
    }
}

/// Which process group a collective runs over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GroupKind {
    /// Tensor-parallel group.
    Tp,
    /// Data-parallel group (all replicas).
    Dp,
    /// Expert-parallel group.
    Ep,
    /// Data-parallel group excluding the expert dimension.
    DpEp,
    /// Pipeline neighbours.
    Pp,
}

impl GroupKind {
    /// All group kinds, for per-group tables.
    pub const ALL: [GroupKind; 5] = [Self::Tp, Self::Dp, Self::Ep, Self::DpEp, Self::Pp];

    /// A stable index for per-group tables.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Tp => 0,
            Self::Dp => 1,
            Self::Ep => 2,
            Self::DpEp => 3,
            Self::Pp => 4,
        }
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            Self::Tp => "TP",
            Self::Dp => "DP",
            Self::Ep => "EP",
            Self::DpEp => "DP_EP",
            Self::Pp => "PP",
        };
        write!(f, "{text}")
    }
}

/// A collective kind cell of a layer line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CollectiveSpec {
    /// The operation, or `None` for the `NONE` kind.
    pub op: Option<CollectiveOp>,
    /// The group it runs over.
    pub group: GroupKind,
}

impl CollectiveSpec {
    /// Parse a collective kind, applying the phase's default group unless
    /// an `_EP` or `_DP_EP` suffix overrides it.
    pub fn parse(raw: &str, default_group: GroupKind) -> Result<Self, SimError> {
        let (base, group) = if let Some(base) = raw.strip_suffix("_DP_EP") {
            (base, GroupKind::DpEp)
        } else if let Some(base) = raw.strip_suffix("_EP") {
            (base, GroupKind::Ep)
        } else {
            (raw, default_group)
        };
        Ok(Self {
            op: CollectiveOp::parse(base)?,
            group,
        })
    }
}

/// Compute and communication of one training phase of a layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseSpec {
    /// Compute delay in cycles.
    pub compute: Cycles,
    /// The collective issued after the compute.
    pub comm: CollectiveSpec,
    /// Message size of the collective.
    pub bytes: Bytes,
}

/// One parsed layer line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayerSpec {
    /// Layer name.
    pub name: String,
    /// Reserved dependency field, carried through unchanged.
    pub reserved: i64,
    /// Forward pass.
    pub fwd: PhaseSpec,
    /// Input-gradient pass.
    pub input_grad: PhaseSpec,
    /// Weight-gradient pass.
    pub weight_grad: PhaseSpec,
    /// Optimizer update time appended to the weight-gradient compute.
    pub weight_grad_update_time: Cycles,
    /// Optional per-layer policy override token.
    pub specific_policy: Option<String>,
}

/// The parsed header line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadHeader {
    /// Parallelisation strategy.
    pub policy: ParallelismPolicy,
    /// Tensor-parallel group size.
    pub model_parallel_npu_group: usize,
    /// Expert-parallel group size.
    pub expert_parallel_npu_group: usize,
    /// Pipeline stages.
    pub pipeline_parallelism: usize,
    /// Virtual pipeline stages per rank.
    pub virtual_pipeline: usize,
    /// Gradient-accumulation factor (microbatches).
    pub gradient_accumulation: usize,
    /// Declared cluster size (0 = take it from the topology).
    pub all_gpus: usize,
    /// Pipeline point-to-point message size.
    pub pp_comm_bytes: Bytes,
    /// Layers whose activations are kept.
    pub checkpoints: Vec<usize>,
    /// Layers whose backward pass triggers recomputation.
    pub checkpoint_initiates: Vec<usize>,
}

impl WorkloadHeader {
    fn parse(line: &str) -> Result<Self, SimError> {
        let mut tokens = line.split_whitespace();
        let Some(policy) = tokens.next() else {
            return sim_error!("empty workload header");
        };
        let mut header = Self {
            policy: ParallelismPolicy::parse(policy)?,
            model_parallel_npu_group: 1,
            expert_parallel_npu_group: 1,
            pipeline_parallelism: 1,
            virtual_pipeline: 1,
            gradient_accumulation: 1,
            all_gpus: 0,
            pp_comm_bytes: 0,
            checkpoints: Vec::new(),
            checkpoint_initiates: Vec::new(),
        };

        fn next_number<T: FromStr>(
            key: &str,
            tokens: &mut std::str::SplitWhitespace,
        ) -> Result<T, SimError> {
            match tokens.next().map(str::parse) {
                Some(Ok(value)) => Ok(value),
                _ => sim_error!("header attribute '{key}' needs a numeric value"),
            }
        }

        fn next_list(
            key: &str,
            tokens: &mut std::str::SplitWhitespace,
        ) -> Result<Vec<usize>, SimError> {
            let count: usize = next_number(key, tokens)?;
            (0..count).map(|_| next_number(key, tokens)).collect()
        }

        while let Some(key) = tokens.next() {
            match key {
                "model_parallel_NPU_group:" => {
                    header.model_parallel_npu_group = next_number(key, &mut tokens)?;
                }
                "ep:" => header.expert_parallel_npu_group = next_number(key, &mut tokens)?,
                "pp:" => header.pipeline_parallelism = next_number(key, &mut tokens)?,
                "vpp:" => header.virtual_pipeline = next_number(key, &mut tokens)?,
                "ga:" => header.gradient_accumulation = next_number(key, &mut tokens)?,
                "all_gpus:" => header.all_gpus = next_number(key, &mut tokens)?,
                "pp_comm:" => header.pp_comm_bytes = next_number(key, &mut tokens)?,
                "checkpoints:" => header.checkpoints = next_list(key, &mut tokens)?,
                "checkpoint_initiates:" => {
                    header.checkpoint_initiates = next_list(key, &mut tokens)?;
                }
                _ => return sim_error!("unknown header attribute '{key}'"),
            }
        }
        Ok(header)
    }

    /// Re-emit the header line; parsing it back reproduces this header.
    #[must_use]
    pub fn to_line(&self) -> String {
        let mut line = format!(
            "{} model_parallel_NPU_group: {} ep: {} pp: {} vpp: {} ga: {} all_gpus: {} pp_comm: {}",
            self.policy,
            self.model_parallel_npu_group,
            self.expert_parallel_npu_group,
            self.pipeline_parallelism,
            self.virtual_pipeline,
            self.gradient_accumulation,
            self.all_gpus,
            self.pp_comm_bytes,
        );
        for (key, list) in [
            ("checkpoints:", &self.checkpoints),
            ("checkpoint_initiates:", &self.checkpoint_initiates),
        ] {
            if !list.is_empty() {
                line.push_str(&format!(" {key} {}", list.len()));
                for index in list {
                    line.push_str(&format!(" {index}"));
                }
            }
        }
        line
    }
}

/// A fully parsed workload file.
#[derive(Clone, Debug)]
pub struct WorkloadFile {
    /// The header line.
    pub header: WorkloadHeader,
    /// The layer lines, in order.
    pub layers: Vec<LayerSpec>,
}

impl WorkloadFile {
    /// Parse a workload file.
    pub fn from_file(path: &Path) -> Result<Self, SimError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SimError(format!("unable to read {}: {e}", path.display())))?;
        Self::from_str(&text)
    }

    /// Parse workload text.
    #[expect(clippy::should_implement_trait)]
    pub fn from_str(text: &str) -> Result<Self, SimError> {
        let mut lines = text.lines().filter(|line| !line.trim().is_empty());
        let Some(header_line) = lines.next() else {
            return sim_error!("workload file is empty");
        };
        let header = WorkloadHeader::parse(header_line)?;

        let Some(count_line) = lines.next() else {
            return sim_error!("workload file has no layer count");
        };
        let count: usize = match count_line.trim().parse() {
            Ok(count) => count,
            Err(_) => return sim_error!("bad layer count '{}'", count_line.trim()),
        };

        let mut layers = Vec::with_capacity(count);
        for index in 0..count {
            let Some(line) = lines.next() else {
                return sim_error!("workload file ends after {index} of {count} layers");
            };
            layers.push(Self::parse_layer(line)?);
        }

        let file = Self { header, layers };
        file.validate()?;
        Ok(file)
    }

    fn parse_layer(line: &str) -> Result<LayerSpec, SimError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 12 || tokens.len() > 13 {
            return sim_error!(
                "layer line has {} fields, expected 12 or 13: '{line}'",
                tokens.len()
            );
        }
        fn number<T: FromStr>(what: &str, raw: &str) -> Result<T, SimError> {
            match raw.parse() {
                Ok(value) => Ok(value),
                Err(_) => sim_error!("bad {what} '{raw}'"),
            }
        }
        let phase = |at: usize, default_group: GroupKind| -> Result<PhaseSpec, SimError> {
            Ok(PhaseSpec {
                compute: number("compute cycles", tokens[at])?,
                comm: CollectiveSpec::parse(tokens[at + 1], default_group)?,
                bytes: number("message bytes", tokens[at + 2])?,
            })
        };
        Ok(LayerSpec {
            name: tokens[0].to_string(),
            reserved: number("dependency field", tokens[1])?,
            fwd: phase(2, GroupKind::Tp)?,
            input_grad: phase(5, GroupKind::Tp)?,
            weight_grad: phase(8, GroupKind::Dp)?,
            weight_grad_update_time: number("weight update time", tokens[11])?,
            specific_policy: tokens.get(12).map(|raw| (*raw).to_string()),
        })
    }

    fn validate(&self) -> Result<(), SimError> {
        let count = self.layers.len();
        for checkpoint in &self.header.checkpoints {
            if *checkpoint >= count {
                return sim_error!("checkpoint layer {checkpoint} out of range (S = {count})");
            }
        }
        for trigger in &self.header.checkpoint_initiates {
            if *trigger >= count {
                return sim_error!("recompute trigger {trigger} out of range (S = {count})");
            }
            if !self.header.checkpoints.iter().any(|c| c < trigger) {
                return sim_error!("recompute trigger {trigger} has no earlier checkpoint");
            }
        }
        let pp = self.header.pipeline_parallelism;
        if pp > 1 && self.header.gradient_accumulation < pp {
            return sim_error!(
                "{} microbatches cannot fill {pp} pipeline stages",
                self.header.gradient_accumulation
            );
        }
        Ok(())
    }
}
