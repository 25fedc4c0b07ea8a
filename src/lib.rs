pub mod densifier;
pub mod depth;
pub mod frame;
pub mod geometry;
pub mod grid;
pub mod io;
pub mod ortho;
pub mod stage;
pub mod system;

#[cfg(test)]
mod test_utils;
