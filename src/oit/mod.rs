//! Order-independent transparency by depth peeling, plus the two simpler
//! transparency modes it is compared against.
//!
//! # Frame structure (depth peeling)
//!
//! ```text
//!  seed:       mesh ──Less──▶ accumulation.color (c*a, 1-a)   + pair[0].depth
//!  iteration i:
//!    peel      mesh, discard z <= pair[i%2].depth ──▶ pair[(i+1)%2] color+depth
//!              occlusion query == 0 ? stop
//!    composite pair[(i+1)%2].color ──UNDER──▶ accumulation.color
//!  resolve:    accumulation.rgb + accumulation.a * background ──▶ screen
//! ```
//!
//! The loop stops on the first empty peel or after [`PeelCap`] passes,
//! whichever comes first.

pub mod blend;
mod capture;
mod compositor;
mod occlusion;
mod orchestrator;
mod peeler;
mod pipelines;
#[cfg(test)]
mod software;
pub mod state;
mod targets;

pub use capture::{capture_targets, read_color};
pub use compositor::LayerCompositor;
pub use occlusion::OcclusionQuery;
pub use orchestrator::{
    FrameParams, FrameStats, LayerPass, ParseModeError, PeelCap, PeelReport, RenderMode,
    Termination, TransparencyRenderer, run_peel_loop,
};
pub use peeler::{LayerPeeler, MeshDraw};
pub use pipelines::{BindLayouts, PipelineCache, PipelineKey, Program, ProgramInput};
pub use state::{DrawState, StateGuard, two_pass_blend};
pub use targets::{
    AccumulationTarget, Attachment, DEPTH_FORMAT, LAYER_COLOR_FORMAT, PingPong, RenderTarget,
    TargetPool, TargetStatus,
};
