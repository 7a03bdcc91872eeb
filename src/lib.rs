pub mod api;
pub mod app;
pub mod config;
pub mod controller;
pub mod error;
pub mod guide;
pub mod nav_guard;
pub mod pages;
pub mod reachability;
pub mod recovery;
pub mod rest_timer;
pub mod storage;
pub mod transport;
pub mod types;

use wasm_bindgen::prelude::*;
use leptos::*;

#[wasm_bindgen(start)]
pub fn main() {
    console_error_panic_hook::set_once();
    #[cfg(target_arch = "wasm32")]
    tracing_wasm::set_as_global_default();

    mount_to_body(app::App);
}
