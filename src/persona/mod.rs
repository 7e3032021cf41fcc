//! 人设：发送能力抽象与目录

pub mod directory;

pub use directory::{PersonaDirectory, PersonaSender};
