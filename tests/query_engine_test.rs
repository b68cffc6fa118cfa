//! Integration tests for the query evaluator
//! Exercises QueryEngine end to end: indexing, helpers, mode detection, limits, stripping

use serde_json::{json, Value};

use figma_rest_mcp::config::QueryConfig;
use figma_rest_mcp::query::{strip_heavy_data, QueryEngine, MAX_DEPTH_PLACEHOLDER};
use figma_rest_mcp::Error;

fn engine() -> QueryEngine {
    QueryEngine::new(&QueryConfig {
        timeout_ms: 2000,
        max_result_depth: 50,
    })
}

fn document_with_text(visible: bool) -> Value {
    json!({
        "id": "0:0",
        "name": "Document",
        "type": "DOCUMENT",
        "children": [{
            "id": "1:1",
            "name": "Page",
            "type": "CANVAS",
            "children": [{"id": "2:1", "name": "Label", "type": "TEXT", "characters": "Hi", "visible": visible}]
        }]
    })
}

async fn eval(document: Value, query: &str) -> Result<Option<Value>, Error> {
    engine().evaluate(document, query).await
}

// ============================================================================
// Helpers and visibility
// ============================================================================

mod helper_tests {
    use super::*;

    #[tokio::test]
    async fn test_hidden_text_is_excluded() {
        let result = eval(document_with_text(false), "getAllText()").await.unwrap();
        assert_eq!(result, Some(json!([])));
    }

    #[tokio::test]
    async fn test_visible_text_is_included() {
        let result = eval(document_with_text(true), "getAllText()").await.unwrap();
        assert_eq!(result, Some(json!([{"id": "2:1", "name": "Label", "text": "Hi"}])));
    }

    #[tokio::test]
    async fn test_find_by_id() {
        let doc = document_with_text(true);
        assert_eq!(
            eval(doc.clone(), "findById('1:1').name").await.unwrap(),
            Some(json!("Page"))
        );
        assert_eq!(eval(doc, "findById('missing')").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_document_binding() {
        let result = eval(
            document_with_text(true),
            "document.children.map(page => ({ name: page.name, count: page.children.length }))",
        )
        .await
        .unwrap();
        assert_eq!(result, Some(json!([{"name": "Page", "count": 1}])));
    }
}

// ============================================================================
// Modes
// ============================================================================

mod mode_tests {
    use super::*;

    #[tokio::test]
    async fn test_expression_and_return_agree() {
        let doc = document_with_text(true);
        for expr in [
            "findByType('TEXT').map(n => n.id)",
            "getAllNodes().length * 2",
            "({ pages: document.children.length, first: findByType('CANVAS')[0]?.name })",
        ] {
            let as_expression = eval(doc.clone(), expr).await.unwrap();
            let as_statement = eval(doc.clone(), &format!("return {};", expr)).await.unwrap();
            assert_eq!(as_expression, as_statement, "mismatch for {}", expr);
        }
    }

    #[tokio::test]
    async fn test_statement_without_return_yields_undefined() {
        let result = eval(document_with_text(true), "const nodes = getAllNodes();").await.unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_if_statement_mode() {
        let result = eval(document_with_text(true), "if (true) return 1").await.unwrap();
        assert_eq!(result, Some(json!(1)));
    }

    #[tokio::test]
    async fn test_query_is_trimmed() {
        let result = eval(document_with_text(true), "\n   getAllNodes().length  \n").await.unwrap();
        assert_eq!(result, Some(json!(3)));
    }
}

// ============================================================================
// Errors and limits
// ============================================================================

mod limit_tests {
    use super::*;

    #[tokio::test]
    async fn test_non_terminating_query_times_out() {
        let engine = QueryEngine::new(&QueryConfig {
            timeout_ms: 150,
            max_result_depth: 50,
        });
        let started = std::time::Instant::now();
        let err = engine
            .evaluate(document_with_text(true), "for (;;) {}")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QueryTimeout { budget_ms: 150 }));
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_timeout_is_not_catchable() {
        let engine = QueryEngine::new(&QueryConfig {
            timeout_ms: 150,
            max_result_depth: 50,
        });
        let err = engine
            .evaluate(document_with_text(true), "try { while (true) {} } catch (e) { return 'caught'; }")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QueryTimeout { .. }));
    }

    #[tokio::test]
    async fn test_runaway_recursion_is_a_range_error() {
        let err = eval(document_with_text(true), "function f(n) { return f(n + 1); } return f(0);")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Maximum call stack size exceeded");
    }

    #[tokio::test]
    async fn test_syntax_error() {
        let err = eval(document_with_text(true), "getAllNodes(").await.unwrap_err();
        assert!(matches!(err, Error::Query(_)));
    }

    #[tokio::test]
    async fn test_thrown_error_message() {
        let err = eval(document_with_text(true), "throw new Error('boom');").await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn test_no_ambient_capabilities() {
        for query in ["require('fs')", "process.exit(1)", "setTimeout(() => 1, 10)", "fetch('http://x')"] {
            let err = eval(document_with_text(true), query).await.unwrap_err();
            assert!(err.to_string().ends_with("is not defined"), "{} -> {}", query, err);
        }
    }

    #[tokio::test]
    async fn test_concurrent_queries_are_independent() {
        let a = eval(document_with_text(true), "globalThisValue = 1; return globalThisValue;");
        let b = eval(document_with_text(true), "typeof globalThisValue");
        let (a, b) = tokio::join!(a, b);
        assert_eq!(a.unwrap(), Some(json!(1)));
        assert_eq!(b.unwrap(), Some(json!("undefined")));
    }
}

// ============================================================================
// Result stripping
// ============================================================================

mod strip_tests {
    use super::*;

    #[tokio::test]
    async fn test_geometry_replaced_in_results() {
        let doc = json!({
            "id": "0", "type": "DOCUMENT",
            "children": [{"id": "1", "type": "VECTOR", "fillGeometry": [{"path": "M0 0"}], "strokeGeometry": [], "name": "v"}]
        });
        let result = eval(doc, "findById('1')").await.unwrap().unwrap();
        assert_eq!(
            result,
            json!({"id": "1", "type": "VECTOR", "fillGeometry": "[Geometry data removed]", "strokeGeometry": "[Geometry data removed]", "name": "v"})
        );
    }

    #[tokio::test]
    async fn test_deep_results_are_cut() {
        let result = eval(
            document_with_text(true),
            "let v = 'leaf'; for (let i = 0; i < 60; i++) { v = [v]; } return v;",
        )
        .await
        .unwrap()
        .unwrap();

        let mut current = &result;
        let mut depth = 0;
        while let Value::Array(items) = current {
            current = &items[0];
            depth += 1;
        }
        assert_eq!(current, &json!(MAX_DEPTH_PLACEHOLDER));
        assert_eq!(depth, 51);
    }

    #[tokio::test]
    async fn test_cyclic_results_terminate() {
        let result = eval(document_with_text(true), "const a = {}; a.self = a; return a;")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(strip_heavy_data(&result, 50), result);
    }
}
