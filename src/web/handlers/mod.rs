pub mod auth;
pub mod background;
pub mod edit_history;
pub mod gallery;
pub mod generate;
pub mod health;
pub mod inpaint;
pub mod sam;
pub mod stats;
pub mod style;
pub mod tasks;
