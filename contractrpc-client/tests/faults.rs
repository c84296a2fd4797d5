mod common;

use std::time::Duration;

use common::{Calculator, DivideByZero, client, connect, host_builder, new_log, open_requests};
use contractrpc_client::{
    Arguments, CallOptions, CancellationToken, ClientFaultContext, Code, RpcError,
};
use futures::StreamExt;

#[tokio::test]
async fn test_fault_detail_round_trip() -> anyhow::Result<()> {
    let calculator = client().proxy::<Calculator>()?;

    let quotient: i32 = calculator
        .call("Divide", Arguments::new().with_value(8).with_value(2))
        .await?
        .into_value()?;
    assert_eq!(quotient, 4);

    let result = calculator
        .call("Divide", Arguments::new().with_value(7).with_value(0))
        .await;
    let Err(RpcError::Fault(fault)) = result else {
        panic!("expected a fault");
    };
    assert_eq!(fault.code(), Code::InvalidArgument);
    assert_eq!(fault.message(), "cannot divide 7 by zero");
    assert_eq!(
        fault.detail::<DivideByZero>(),
        Some(&DivideByZero { dividend: 7 })
    );
    Ok(())
}

#[tokio::test]
async fn test_unregistered_detail_keeps_raw_value() -> anyhow::Result<()> {
    let client = contractrpc_client::ContractClient::builder(contractrpc::InMemoryChannel::new(
        host_builder(&new_log()).build(),
    ))
    .build();

    let result = client
        .proxy::<Calculator>()?
        .call("Divide", Arguments::new().with_value(3).with_value(0))
        .await;
    let Err(RpcError::Fault(fault)) = result else {
        panic!("expected a fault");
    };
    assert!(fault.detail::<DivideByZero>().is_none());
    assert_eq!(fault.raw_detail()["dividend"], 3);
    Ok(())
}

#[tokio::test]
async fn test_fault_inside_response_stream() -> anyhow::Result<()> {
    let calculator = client().proxy::<Calculator>()?;

    let mut returns = calculator
        .call("Countdown", Arguments::new().with_value(3))
        .await?;
    let mut values = returns.take_stream(0)?.into_typed::<i32>();

    let mut seen = Vec::new();
    let mut fault = None;
    while let Some(item) = values.next().await {
        match item {
            Ok(value) => seen.push(value),
            Err(error) => fault = Some(error),
        }
    }

    assert_eq!(seen, vec![3, 2, 1]);
    let Some(RpcError::Fault(fault)) = fault else {
        panic!("expected the stream to end with a fault");
    };
    assert_eq!(
        fault.detail::<DivideByZero>(),
        Some(&DivideByZero { dividend: 3 })
    );
    Ok(())
}

#[tokio::test]
async fn test_client_fault_handler_replaces_error() -> anyhow::Result<()> {
    let client = connect(host_builder(&new_log()).build())
        .fault_handler(|ctx: &ClientFaultContext<'_>| match ctx.error {
            RpcError::Fault(fault) => Some(RpcError::status(
                Code::Aborted,
                format!("{} failed: {}", ctx.operation.operation_name(), fault.message()),
            )),
            _ => None,
        })
        .build();

    let result = client
        .proxy::<Calculator>()?
        .call("Divide", Arguments::new().with_value(1).with_value(0))
        .await;

    let Err(error) = result else {
        panic!("expected an error");
    };
    assert_eq!(error.code(), Code::Aborted);
    assert_eq!(
        error.to_string(),
        RpcError::status(Code::Aborted, "Divide failed: cannot divide 1 by zero").to_string()
    );
    Ok(())
}

#[tokio::test]
async fn test_unmapped_error_becomes_status() -> anyhow::Result<()> {
    let calculator = client().proxy::<Calculator>()?;

    let result = calculator
        .call("Divide", Arguments::new().with_value("seven").with_value(1))
        .await;

    let Err(error) = result else {
        panic!("expected an error");
    };
    assert!(matches!(error, RpcError::Status { .. }));
    Ok(())
}

#[tokio::test]
async fn test_pre_cancelled_call() -> anyhow::Result<()> {
    let calculator = client().proxy::<Calculator>()?;
    let token = CancellationToken::new();
    token.cancel();

    let result = calculator
        .call(
            "Add",
            Arguments::new()
                .with_value(1)
                .with_value(2)
                .with_options(CallOptions::new().cancellation(token)),
        )
        .await;

    assert!(matches!(result, Err(RpcError::Cancelled)));
    Ok(())
}

#[tokio::test]
async fn test_cancel_stops_response_stream() -> anyhow::Result<()> {
    let calculator = client().proxy::<Calculator>()?;
    let token = CancellationToken::new();

    let mut returns = calculator
        .call("Ticks", Arguments::new().with_cancellation(token.clone()))
        .await?;
    let mut ticks = returns.take_stream(0)?.into_typed::<u64>();

    assert_eq!(ticks.next().await.transpose()?, Some(0));
    assert_eq!(ticks.next().await.transpose()?, Some(1));

    token.cancel();
    assert!(matches!(ticks.next().await, Some(Err(RpcError::Cancelled))));
    assert!(ticks.next().await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_timeout_reports_deadline_exceeded() -> anyhow::Result<()> {
    let calculator = client().proxy::<Calculator>()?;

    let result = calculator
        .call(
            "Slow",
            Arguments::new()
                .with_value(10_000)
                .with_options(CallOptions::new().timeout(Duration::from_millis(50))),
        )
        .await;

    let Err(error) = result else {
        panic!("expected a timeout");
    };
    assert_eq!(error.code(), Code::DeadlineExceeded);
    Ok(())
}

#[tokio::test]
async fn test_timeout_ends_duplex_request_stream() -> anyhow::Result<()> {
    let calculator = client().proxy::<Calculator>()?;
    let (tx, requests) = open_requests();

    let mut returns = calculator
        .call(
            "Scale",
            Arguments::new()
                .with_value(2)
                .with_stream(requests)
                .with_options(CallOptions::new().timeout(Duration::from_millis(50))),
        )
        .await?;

    // Nothing reads the responses yet, so only the request side sees the deadline.
    tokio::time::timeout(Duration::from_secs(2), tx.closed()).await?;

    let mut values = returns.take_stream(0)?.into_typed::<i32>();
    let Some(Err(error)) = values.next().await else {
        panic!("expected the response stream to fail");
    };
    assert_eq!(error.code(), Code::DeadlineExceeded);
    assert!(values.next().await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_default_timeout() -> anyhow::Result<()> {
    let client = connect(host_builder(&new_log()).build())
        .timeout(Duration::from_millis(50))
        .build();
    assert_eq!(client.default_timeout(), Some(Duration::from_millis(50)));

    let result = client
        .proxy::<Calculator>()?
        .call("Slow", Arguments::new().with_value(10_000))
        .await;
    assert_eq!(result.err().map(|e| e.code()), Some(Code::DeadlineExceeded));

    // Fast calls still succeed.
    client
        .proxy::<Calculator>()?
        .call("Slow", Arguments::new().with_value(0))
        .await?;
    Ok(())
}

#[tokio::test]
async fn test_unbound_operation_is_unimplemented() -> anyhow::Result<()> {
    let calculator = client().proxy::<Calculator>()?;

    let result = calculator.call("Unbound", Arguments::new()).await;

    assert_eq!(result.err().map(|e| e.code()), Some(Code::Unimplemented));
    Ok(())
}

#[tokio::test]
async fn test_unexposed_method_is_unimplemented() -> anyhow::Result<()> {
    let calculator = client().proxy::<Calculator>()?;

    let helper = calculator.call("Helper", Arguments::new()).await;
    let Err(error) = helper else {
        panic!("expected an error");
    };
    assert_eq!(error.code(), Code::Unimplemented);
    assert!(error.to_string().contains("ICalculator.Helper is not exposed"));

    let missing = calculator.call("Missing", Arguments::new()).await;
    assert_eq!(missing.err().map(|e| e.code()), Some(Code::Unimplemented));
    Ok(())
}

#[tokio::test]
async fn test_metadata_reaches_server_context() -> anyhow::Result<()> {
    let client = connect(host_builder(&new_log()).build())
        .header("x-tenant", "acme")?
        .build();

    let options = CallOptions::new()
        .header("x-user", "ada")?
        .header("x-fault-message", "forged")?;
    let whoami: String = client
        .proxy::<Calculator>()?
        .call("Whoami", Arguments::new().with_options(options))
        .await?
        .into_value()?;

    assert_eq!(whoami, "ada@acme leaked=false");
    Ok(())
}
