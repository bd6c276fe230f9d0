// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP control-surface contract (§6.2). No HTTP framework is wired in —
//! this module is a `RouteTable` exercised directly by constructing a
//! `Request` and calling `dispatch`; a binary embedding this crate is free
//! to bridge any framework's request/response types onto it.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use bytes::Bytes;
use serde_json::{Value, json};

use crate::{
    auth::TokenService,
    cache::CacheManager,
    error::CoreError,
    observability::Monitor,
    tasks::{Scheduler, Task},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

pub struct Request {
    pub method: Method,
    pub path: String,
    pub query: HashMap<String, String>,
    pub bearer: Option<String>,
    pub body: Bytes,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: HashMap::new(),
            bearer: None,
            body: Bytes::new(),
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    fn json_body(&self) -> Result<Value, CoreError> {
        serde_json::from_slice(&self.body).map_err(|e| CoreError::Validation(e.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: Value,
}

impl Response {
    pub fn ok(data: Value) -> Self {
        Self {
            status: 200,
            body: json!({ "code": 0, "message": "ok", "data": data }),
        }
    }

    /// Every non-2xx response still carries the `{code, message, data}`
    /// envelope (§6.2); `status` is the fixed §7 HTTP mapping.
    pub fn error(status: u16, code: i64, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "code": code, "message": message.into(), "data": Value::Null }),
        }
    }

    fn from_core_error(e: CoreError) -> Self {
        Self::error(e.http_status(), e.tcp_error_code().code() as i64, e.to_string())
    }
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
type HandlerFn = Box<dyn Fn(Request) -> BoxFuture<'static, Response> + Send + Sync>;

struct Route {
    method: Method,
    path: &'static str,
    auth_required: bool,
    handler: HandlerFn,
}

#[derive(Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&mut self, method: Method, path: &'static str, auth_required: bool, handler: F)
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.routes.push(Route {
            method,
            path,
            auth_required,
            handler: Box::new(move |req| Box::pin(handler(req))),
        });
    }

    /// Routes `request`, checking `authorize` (returns true for a valid
    /// bearer token) only when the matched route requires it.
    pub async fn dispatch(&self, request: Request, authorize: impl Fn(&str) -> bool) -> Response {
        let Some(route) = self.routes.iter().find(|r| r.method == request.method && r.path == request.path) else {
            return Response::error(404, 4003, format!("no route for {}", request.path));
        };

        if route.auth_required {
            match &request.bearer {
                Some(token) if authorize(token) => {},
                _ => return Response::error(401, 4002, "missing or invalid bearer token"),
            }
        }

        (route.handler)(request).await
    }

    pub fn register_health(&mut self) {
        self.register(Method::Get, "/health", false, |_req| async { Response::ok(json!({ "status": "ok" })) });
        self.register(Method::Get, "/health/detailed", false, |_req| async {
            Response::ok(json!({ "status": "ok", "components": [] }))
        });
        self.register(Method::Get, "/health/components", false, |_req| async {
            Response::ok(json!({ "components": [] }))
        });
    }

    pub fn register_cache_routes(&mut self, cache: Arc<CacheManager>) {
        {
            let cache = cache.clone();
            self.register(Method::Post, "/api/v1/cache/set", false, move |req| {
                let cache = cache.clone();
                async move {
                    let Ok(body) = req.json_body() else {
                        return Response::error(400, 4001, "invalid JSON body");
                    };
                    let key = body.get("key").and_then(Value::as_str).unwrap_or_default().to_string();
                    let value = body.get("value").cloned().unwrap_or(Value::Null);
                    let bytes = Bytes::from(serde_json::to_vec(&value).unwrap_or_default());
                    let accepted = cache.set(&key, bytes, None).await;
                    Response::ok(json!({ "accepted": accepted }))
                }
            });
        }
        {
            let cache = cache.clone();
            self.register(Method::Get, "/api/v1/cache/get", false, move |req| {
                let cache = cache.clone();
                async move {
                    let key = req.query.get("key").cloned().unwrap_or_default();
                    match cache.get(&key).await {
                        Some(bytes) => {
                            let value: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
                            Response::ok(json!({ "key": key, "value": value }))
                        },
                        None => Response::from_core_error(CoreError::NotFound(format!("key {key} not found"))),
                    }
                }
            });
        }
        {
            let cache = cache.clone();
            self.register(Method::Delete, "/api/v1/cache/delete", false, move |req| {
                let cache = cache.clone();
                async move {
                    let key = req.query.get("key").cloned().unwrap_or_default();
                    Response::ok(json!({ "deleted": cache.delete(&key).await }))
                }
            });
        }
        {
            let cache = cache.clone();
            self.register(Method::Get, "/api/v1/cache/exists", false, move |req| {
                let cache = cache.clone();
                async move {
                    let key = req.query.get("key").cloned().unwrap_or_default();
                    Response::ok(json!({ "exists": cache.exists(&key).await }))
                }
            });
        }
        {
            let cache = cache.clone();
            self.register(Method::Get, "/api/v1/cache/protection/stats", false, move |_req| {
                let cache = cache.clone();
                async move {
                    let stats = cache.protection_stats();
                    Response::ok(json!({
                        "total_requests": stats.total_requests,
                        "failed_requests": stats.failed_requests,
                        "blocked_keys": stats.blocked_keys,
                    }))
                }
            });
        }
        {
            let cache = cache.clone();
            self.register(Method::Post, "/api/v1/cache/set-json", false, move |req| {
                let cache = cache.clone();
                async move {
                    let Ok(body) = req.json_body() else {
                        return Response::error(400, 4001, "invalid JSON body");
                    };
                    let key = body.get("key").and_then(Value::as_str).unwrap_or_default().to_string();
                    let value = body.get("value").cloned().unwrap_or(Value::Null);
                    match cache.set_json(&key, &value, None).await {
                        Ok(accepted) => Response::ok(json!({ "accepted": accepted })),
                        Err(e) => Response::error(400, 4001, e.to_string()),
                    }
                }
            });
        }
        {
            let cache = cache.clone();
            self.register(Method::Get, "/api/v1/cache/get-json", false, move |req| {
                let cache = cache.clone();
                async move {
                    let key = req.query.get("key").cloned().unwrap_or_default();
                    match cache.get_json::<Value>(&key).await {
                        Ok(Some(value)) => Response::ok(json!({ "key": key, "value": value })),
                        Ok(None) => Response::from_core_error(CoreError::NotFound(format!("key {key} not found"))),
                        Err(e) => Response::error(400, 4001, e.to_string()),
                    }
                }
            });
        }
        {
            let cache = cache.clone();
            self.register(Method::Post, "/api/v1/cache/warmup", false, move |req| {
                let cache = cache.clone();
                async move {
                    let Ok(body) = req.json_body() else {
                        return Response::error(400, 4001, "invalid JSON body");
                    };
                    let Some(entries) = body.get("entries").and_then(Value::as_array) else {
                        return Response::error(400, 4001, "warmup requires an entries array");
                    };
                    let entries: Vec<(String, Bytes)> = entries
                        .iter()
                        .filter_map(|e| {
                            let key = e.get("key")?.as_str()?.to_string();
                            let value = e.get("value").cloned().unwrap_or(Value::Null);
                            Some((key, Bytes::from(serde_json::to_vec(&value).unwrap_or_default())))
                        })
                        .collect();
                    let loaded = cache.warmup(entries).await;
                    Response::ok(json!({ "loaded": loaded }))
                }
            });
        }
        self.register(Method::Post, "/api/v1/cache/invalidate", false, move |req| {
            let cache = cache.clone();
            async move {
                let Ok(body) = req.json_body() else {
                    return Response::error(400, 4001, "invalid JSON body");
                };
                if let Some(prefix) = body.get("prefix").and_then(Value::as_str) {
                    return match cache.invalidate_by_prefix(prefix).await {
                        Ok(removed) => Response::ok(json!({ "removed": removed })),
                        Err(e) => Response::error(400, 4001, e.to_string()),
                    };
                }
                if let Some(keys) = body.get("keys").and_then(Value::as_array) {
                    let keys: Vec<String> = keys.iter().filter_map(Value::as_str).map(str::to_string).collect();
                    let removed = cache.batch_invalidate(&keys).await;
                    return Response::ok(json!({ "removed": removed }));
                }
                if let Some(pattern) = body.get("pattern").and_then(Value::as_str) {
                    return match cache.invalidate_by_pattern(pattern) {
                        Ok(removed) => Response::ok(json!({ "removed": removed })),
                        Err(e) => Response::error(400, 4001, e.to_string()),
                    };
                }
                Response::error(400, 4001, "invalidate requires one of pattern, prefix, keys")
            }
        });
    }

    /// `POST /api/v1/players/login` issues a token pair on success. Public:
    /// a caller without a token is exactly who needs one.
    pub fn register_login_route(&mut self, tokens: Arc<TokenService>) {
        self.register(Method::Post, "/api/v1/players/login", false, move |req| {
            let tokens = tokens.clone();
            async move {
                let Ok(body) = req.json_body() else {
                    return Response::error(400, 4001, "invalid JSON body");
                };
                let game_id = body.get("game_id").and_then(Value::as_str).unwrap_or_default();
                let username = body.get("username").and_then(Value::as_str).unwrap_or_default();
                let user_id = body.get("user_id").and_then(Value::as_str).unwrap_or(username);
                if game_id.is_empty() || username.is_empty() {
                    return Response::error(400, 4001, "game_id and username are required");
                }

                let issued = tokens.generate(user_id, game_id, username);
                Response::ok(json!({
                    "access_token": issued.access_token,
                    "refresh_token": issued.refresh_token,
                    "token_type": "Bearer",
                    "expires_in": issued.expires_in,
                    "expires_at": issued.expires_at,
                }))
            }
        });
    }

    pub fn register_async_routes(&mut self, scheduler: Arc<Scheduler>) {
        {
            let scheduler = scheduler.clone();
            self.register(Method::Post, "/api/v1/async/task", false, move |req| {
                let scheduler = scheduler.clone();
                async move {
                    let Ok(body) = req.json_body() else {
                        return Response::error(400, 4001, "invalid JSON body");
                    };
                    let task = Task {
                        id: body.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
                        task_type: body.get("type").and_then(Value::as_str).unwrap_or_default().to_string(),
                        priority: body.get("priority").and_then(Value::as_i64).unwrap_or(0),
                        data: body.get("data").cloned().unwrap_or(Value::Null),
                    };
                    match scheduler.submit(task) {
                        Ok(()) => Response::ok(json!({ "accepted": true })),
                        Err(e) => Response::from_core_error(CoreError::Capacity(e.to_string())),
                    }
                }
            });
        }
        self.register(Method::Get, "/api/v1/async/stats", false, move |_req| {
            let scheduler = scheduler.clone();
            async move {
                let stats = scheduler.stats();
                Response::ok(json!({
                    "running": stats.running,
                    "worker_count": stats.worker_count,
                    "running_workers": stats.running_workers,
                    "queue_size": stats.queue_size,
                }))
            }
        });
    }

    pub fn register_monitor_routes(&mut self, monitor: Arc<Monitor>) {
        self.register(Method::Get, "/api/v1/monitor/metrics", false, move |_req| {
            let monitor = monitor.clone();
            async move { Response::ok(serde_json::to_value(monitor.snapshot()).unwrap_or(Value::Null)) }
        });
    }

    /// `GET /metrics`: the same process snapshot under the top-level path
    /// §6.2 lists alongside the health endpoints.
    pub fn register_top_level_metrics(&mut self, monitor: Arc<Monitor>) {
        self.register(Method::Get, "/metrics", false, move |_req| {
            let monitor = monitor.clone();
            async move { Response::ok(serde_json::to_value(monitor.snapshot()).unwrap_or(Value::Null)) }
        });
    }
}

/// Assembles every core-owned route (§6.2) into one table. Domain paths
/// handled by external collaborators are never registered here.
pub fn core_routes(
    cache: Arc<CacheManager>,
    tokens: Arc<TokenService>,
    scheduler: Arc<Scheduler>,
    monitor: Arc<Monitor>,
) -> RouteTable {
    let mut routes = RouteTable::new();
    routes.register_health();
    routes.register_top_level_metrics(monitor.clone());
    routes.register_login_route(tokens);
    routes.register_cache_routes(cache);
    routes.register_async_routes(scheduler);
    routes.register_monitor_routes(monitor);
    routes
}
