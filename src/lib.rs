//! Linear-elastic response generator for voxel microstructures.
//!
//! Each sample is meshed with one multilinear element per voxel, loaded by a
//! macro strain along one axis under periodic conditions, solved, and reduced
//! to voxel strain, voxel stress and nodal displacement.

pub mod boundary;
pub mod datatypes;
pub mod element;
pub mod error;
pub mod input;
pub mod logging;
pub mod material;
pub mod mesher;
pub mod post_processor;
pub mod properties;
pub mod simulation;
pub mod solver;

pub use error::{Result, VoxelElasticError};
pub use post_processor::Solution;
pub use simulation::{solve, solve_batch, ElasticSimulation};
pub use solver::{LinearSolverKind, SolverSettings};
