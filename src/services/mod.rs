pub mod artwork;
pub mod idle_clock;
