use std::sync::Arc;

use crate::ir::Comp;

use super::graph_parser::GraphParser;
use super::transformation_utils::transform_postorder;
use super::tree_transformations::{
    CalledLambdaToBlockPass, InlineBlockLocalsPass, InsertCalledIdentityPass,
    SelectionFromStructPass,
};
use super::{CompilerError, CompilerResult};

/// Result returned by a [`TreePass`] after it runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassResult {
    /// Whether the pass changed the tree.
    pub changed: bool,
    /// Total number of rewrites applied by the pass.
    pub rewrites_applied: usize,
}

impl PassResult {
    pub fn from_rewrites(rewrites_applied: usize) -> Self {
        Self {
            changed: rewrites_applied > 0,
            rewrites_applied,
        }
    }

    /// Merges two run results, accumulating statistics.
    pub fn merge(self, other: PassResult) -> PassResult {
        PassResult {
            changed: self.changed || other.changed,
            rewrites_applied: self.rewrites_applied + other.rewrites_applied,
        }
    }
}

/// Whole-tree rewrite run by a [`Pipeline`].
pub trait TreePass: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, comp: &Comp) -> CompilerResult<(Comp, PassResult)>;
}

/// Applies [`GraphParser::parse`] at every node, children first.
#[derive(Default)]
pub struct GraphParserPass {
    parser: GraphParser,
}

impl TreePass for GraphParserPass {
    fn name(&self) -> &'static str {
        "graph_parser"
    }

    fn run(&self, comp: &Comp) -> CompilerResult<(Comp, PassResult)> {
        let mut rewrites = 0usize;
        let (out, _) = transform_postorder(comp, &mut |node: &Comp| {
            let (parsed, changed) = self.parser.parse(Some(node))?;
            rewrites += usize::from(changed);
            Ok((parsed, changed))
        })?;
        Ok((out, PassResult::from_rewrites(rewrites)))
    }
}

pub enum Step {
    Pass(Arc<dyn TreePass>),
    FixedPoint { max_iters: usize, steps: Vec<Step> },
}

pub struct PipelineBuilder {
    steps: Vec<Step>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn pass(&mut self, pass: Arc<dyn TreePass>) {
        self.steps.push(Step::Pass(pass));
    }

    pub fn fixed_point<F>(&mut self, max_iters: usize, build: F)
    where
        F: FnOnce(&mut PipelineBuilder),
    {
        let mut inner = PipelineBuilder::new();
        build(&mut inner);
        self.steps.push(Step::FixedPoint {
            max_iters: max_iters.max(1),
            steps: inner.steps,
        });
    }

    pub fn finish(self) -> Vec<Step> {
        self.steps
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Knobs for the default lowering pipeline. `Default` reads the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Iteration bound for the normalization fixed point.
    pub normalize_max_iters: usize,
    /// Log one `info` line per pass run.
    pub log_stats: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            normalize_max_iters: crate::env::normalize_max_iters(),
            log_stats: crate::env::pass_stats_enabled(),
        }
    }
}

/// An ordered list of passes and bounded fixed points.
pub struct Pipeline {
    steps: Vec<Step>,
    log_stats: bool,
}

impl Pipeline {
    pub fn from_steps(steps: Vec<Step>, log_stats: bool) -> Self {
        Self { steps, log_stats }
    }

    /// Normalization fixed point followed by identity insertion.
    pub fn normalization(config: PipelineConfig) -> Self {
        let mut builder = PipelineBuilder::new();
        add_normalization(&mut builder, config.normalize_max_iters);
        Self::from_steps(builder.finish(), config.log_stats)
    }

    /// [`Pipeline::normalization`], then the graph parser.
    pub fn lowering(config: PipelineConfig) -> Self {
        let mut builder = PipelineBuilder::new();
        add_normalization(&mut builder, config.normalize_max_iters);
        builder.pass(Arc::new(GraphParserPass::default()));
        Self::from_steps(builder.finish(), config.log_stats)
    }

    pub fn run(&self, comp: &Comp) -> CompilerResult<(Comp, PassResult)> {
        let mut totals = PassResult::default();
        let (out, _) = run_steps(&self.steps, comp.clone(), &mut totals, self.log_stats)?;
        Ok((out, totals))
    }
}

fn add_normalization(builder: &mut PipelineBuilder, max_iters: usize) {
    builder.fixed_point(max_iters, |p| {
        p.pass(Arc::new(CalledLambdaToBlockPass));
        p.pass(Arc::new(InlineBlockLocalsPass));
        p.pass(Arc::new(SelectionFromStructPass));
    });
    builder.pass(Arc::new(InsertCalledIdentityPass));
}

fn run_steps(
    steps: &[Step],
    mut comp: Comp,
    totals: &mut PassResult,
    log_stats: bool,
) -> CompilerResult<(Comp, bool)> {
    let mut changed_any = false;
    for step in steps {
        match step {
            Step::Pass(pass) => {
                let (out, stats) = pass.run(&comp)?;
                comp = out;
                changed_any |= stats.changed;
                *totals = totals.merge(stats);
                if log_stats {
                    log::info!(
                        "pass {}: changed={} rewrites={}",
                        pass.name(),
                        stats.changed,
                        stats.rewrites_applied
                    );
                } else {
                    log::debug!("pass {} changed={}", pass.name(), stats.changed);
                }
            }
            Step::FixedPoint { max_iters, steps } => {
                let mut iter = 0usize;
                loop {
                    if iter >= *max_iters {
                        log::debug!("fixed point stopped after {iter} iterations");
                        break;
                    }
                    iter += 1;
                    let mut local = PassResult::default();
                    let (out, changed) = run_steps(steps, comp, &mut local, log_stats)?;
                    comp = out;
                    *totals = totals.merge(local);
                    changed_any |= changed;
                    if !changed {
                        break;
                    }
                }
            }
        }
    }
    Ok((comp, changed_any))
}

/// Lowers `comp` through the default pipeline, fusing as much of it as
/// possible into compiled units.
///
/// Returns the rewritten tree and whether any fusion occurred. Normalization
/// alone (inlining, identity insertion) does not set the flag.
pub fn parse_to_graph(comp: Option<&Comp>) -> CompilerResult<(Comp, bool)> {
    let comp = comp.ok_or_else(|| {
        CompilerError::invalid_argument("parse_to_graph received no computation")
    })?;
    let config = PipelineConfig::default();
    let (normalized, _) = Pipeline::normalization(config).run(comp)?;
    let parser = GraphParserPass::default();
    let (out, stats) = parser.run(&normalized)?;
    if config.log_stats {
        log::info!(
            "pass {}: changed={} rewrites={}",
            parser.name(),
            stats.changed,
            stats.rewrites_applied
        );
    }
    Ok((out, stats.changed))
}
