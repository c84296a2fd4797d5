mod common;

use common::{Calculator, Greeter, Log, Recorder, connect, entries, host_builder, new_log};
use contractrpc::{InMemoryChannel, ServiceHost};
use contractrpc_client::{Arguments, ContractClient, RpcError};
use contractrpc_core::{AsyncNext, BoxFuture, Filter, FilterContext, Next};

fn expected_order() -> Vec<&'static str> {
    vec!["B-before", "A-before", "impl", "A-after", "B-after"]
}

/// Server host whose host-wide filters are A (priority 2) and B (priority 1).
fn filtered_host(log: &Log) -> ServiceHost {
    host_builder(log)
        .filter(2, Recorder::new("A", log))
        .filter(1, Recorder::new("B", log))
        .build()
}

#[tokio::test]
async fn test_server_sync_filter_order() {
    let log = new_log();
    let client = connect(filtered_host(&log)).build();

    let value: i32 = client
        .proxy::<Calculator>()
        .unwrap()
        .call("Negate", Arguments::new().with_value(4))
        .await
        .unwrap()
        .into_value()
        .unwrap();

    assert_eq!(value, -4);
    assert_eq!(entries(&log), expected_order());
}

#[tokio::test]
async fn test_server_async_filter_order() {
    let log = new_log();
    let client = connect(filtered_host(&log)).build();

    client
        .proxy::<Calculator>()
        .unwrap()
        .call("Add", Arguments::new().with_value(1).with_value(2))
        .await
        .unwrap();

    assert_eq!(entries(&log), expected_order());
}

#[tokio::test]
async fn test_client_filter_order() {
    let log = new_log();
    let host = host_builder(&log).build();
    let client = connect(host)
        .filter(2, Recorder::new("A", &log))
        .filter(1, Recorder::new("B", &log))
        .build();

    client
        .proxy::<Calculator>()
        .unwrap()
        .call("Add", Arguments::new().with_value(1).with_value(2))
        .await
        .unwrap();

    // The implementation runs inside the client's terminal call.
    assert_eq!(entries(&log), expected_order());
}

#[tokio::test]
async fn test_contract_filters_only_wrap_their_contract() {
    let log = new_log();
    let host = ServiceHost::builder()
        .service(common::calculator(&log).filter(0, Recorder::new("calc", &log)))
        .unwrap()
        .service(common::greeter())
        .unwrap()
        .build();
    let client = ContractClient::builder(InMemoryChannel::new(host)).build();

    client
        .proxy::<Greeter>()
        .unwrap()
        .call("Greet", Arguments::new().with_value("ada"))
        .await
        .unwrap();
    assert!(entries(&log).is_empty());

    client
        .proxy::<Calculator>()
        .unwrap()
        .call("Add", Arguments::new().with_value(1).with_value(2))
        .await
        .unwrap();
    assert_eq!(entries(&log), vec!["calc-before", "impl", "calc-after"]);
}

#[tokio::test]
async fn test_client_contract_filter() {
    let log = new_log();
    let client = connect(host_builder(&new_log()).build())
        .contract_filter::<Greeter, _>(0, Recorder::new("greeter", &log))
        .unwrap()
        .service_filter("demo.Calculator", 0, Recorder::new("calc", &log))
        .build();

    client
        .proxy::<Calculator>()
        .unwrap()
        .call("Add", Arguments::new().with_value(1).with_value(2))
        .await
        .unwrap();
    assert_eq!(entries(&log), vec!["calc-before", "calc-after"]);

    log.lock().clear();
    client
        .proxy::<Greeter>()
        .unwrap()
        .call("Greet", Arguments::new().with_value("ada"))
        .await
        .unwrap();
    assert_eq!(entries(&log), vec!["greeter-before", "greeter-after"]);
}

/// Doubles `a` on the way in and adds one to the result on the way out.
struct Rewrite;

impl Filter for Rewrite {
    fn invoke(&self, ctx: &mut FilterContext, next: Next<'_>) -> Result<(), RpcError> {
        next.run(ctx)
    }

    fn invoke_async<'a>(
        &'a self,
        ctx: &'a mut FilterContext,
        next: AsyncNext<'a>,
    ) -> BoxFuture<'a, Result<(), RpcError>> {
        Box::pin(async move {
            let a: i32 = ctx.request().value_at("a")?;
            ctx.request_mut().set("a", a * 2)?;
            next.run(ctx).await?;
            let result: i32 = ctx.response().value_at("result")?;
            ctx.response_mut().set("result", result + 1)
        })
    }
}

#[tokio::test]
async fn test_filter_rewrites_arguments_and_result() {
    let client = connect(host_builder(&new_log()).build())
        .filter(0, Rewrite)
        .build();

    let value: i32 = client
        .proxy::<Calculator>()
        .unwrap()
        .call("Add", Arguments::new().with_value(5).with_value(1))
        .await
        .unwrap()
        .into_value()
        .unwrap();

    assert_eq!(value, 12);
}

/// Answers every call without reaching the transport.
struct Cached {
    provide: bool,
}

impl Filter for Cached {
    fn invoke(&self, ctx: &mut FilterContext, next: Next<'_>) -> Result<(), RpcError> {
        next.run(ctx)
    }

    fn invoke_async<'a>(
        &'a self,
        ctx: &'a mut FilterContext,
        _next: AsyncNext<'a>,
    ) -> BoxFuture<'a, Result<(), RpcError>> {
        Box::pin(async move {
            if self.provide {
                ctx.response_mut().set("result", 99)?;
                ctx.response_mut().mark_provided();
            }
            Ok(())
        })
    }
}

#[tokio::test]
async fn test_short_circuit_with_provided_response() {
    let log = new_log();
    let client = connect(host_builder(&log).build())
        .filter(0, Cached { provide: true })
        .build();

    let value: i32 = client
        .proxy::<Calculator>()
        .unwrap()
        .call("Add", Arguments::new().with_value(1).with_value(2))
        .await
        .unwrap()
        .into_value()
        .unwrap();

    assert_eq!(value, 99);
    assert!(entries(&log).is_empty());
}

#[tokio::test]
async fn test_short_circuit_without_response_fails() {
    let client = connect(host_builder(&new_log()).build())
        .filter(0, Cached { provide: false })
        .build();

    let result = client
        .proxy::<Calculator>()
        .unwrap()
        .call("Add", Arguments::new().with_value(1).with_value(2))
        .await;

    assert!(matches!(result, Err(RpcError::Pipeline(_))));
}
