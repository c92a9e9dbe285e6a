pub mod canvas;
pub mod fonts;
pub mod layout;
pub mod renderer;
pub mod sink;
