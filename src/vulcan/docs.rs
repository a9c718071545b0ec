use serde_json::{json, Map, Value};

use crate::vulcan::types::VulcanRouter;

/// OpenAPI 3.0 description of the registered routers.
pub fn openapi_document(routers: &[VulcanRouter]) -> Value {
    let mut paths = Map::new();
    for router in routers {
        let mut methods = Map::new();
        for endpoint in &router.endpoints {
            let parameters: Vec<Value> = endpoint
                .params
                .iter()
                .map(|param| {
                    json!({
                        "name": param.name,
                        "in": param.location,
                        "required": param.required,
                        "schema": { "type": param.param_type },
                    })
                })
                .collect();

            methods.insert(
                endpoint.method.as_str().to_lowercase(),
                json!({
                    "summary": format!("Execute {} on {}", endpoint.method, router.path),
                    "parameters": parameters,
                    "responses": {
                        "200": {
                            "description": "Successful response",
                            "content": {
                                "application/json": {
                                    "schema": { "type": "array", "items": { "type": "object" } }
                                }
                            }
                        }
                    }
                }),
            );
        }
        paths.insert(router.path.clone(), Value::Object(methods));
    }

    json!({
        "openapi": "3.0.0",
        "info": { "title": "SQL API", "version": env!("CARGO_PKG_VERSION") },
        "paths": paths,
    })
}
