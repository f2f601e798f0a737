//! Built-in methods every daemon answers.

use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;

use tether_services::{MethodOutput, MethodRouter, Registration};

#[derive(Debug, Serialize)]
pub struct DaemonInfo {
    pub target_id: String,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub methods: Vec<String>,
}

/// Register `Echo_V1` (payload returned as sent) and `GetInfo_V1`.
pub fn register_builtin(router: &MethodRouter, target_id: &str) -> Vec<Registration> {
    let started = Instant::now();
    let target_id = target_id.to_string();
    let listing = router.clone();

    vec![
        router.register("Echo", &["_V1"], |payload: Bytes, content_type: String| async move {
            Ok(MethodOutput {
                payload,
                content_type,
            })
        }),
        router.register_json("GetInfo", &["_V1"], move |_: ()| {
            let info = DaemonInfo {
                target_id: target_id.clone(),
                version: env!("CARGO_PKG_VERSION"),
                uptime_secs: started.elapsed().as_secs(),
                methods: listing.methods(),
            };
            async move { Ok(info) }
        }),
    ]
}
