#![allow(dead_code)]

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use contractrpc::{FnFaultHandler, InMemoryChannel, ServiceBinding, ServiceHost, ServiceHostBuilder};
use contractrpc_client::{ClientBuilder, ContractClient};
use contractrpc_core::{
    Arguments, AsyncNext, BoxFuture, Code, Fault, FaultDetail, Filter, FilterContext,
    InterfaceDescriptor, MethodDescriptor, Next, ReturnItemDescriptor, Returns, RpcError,
    ServerCallContext, ServiceContract, ValueStream,
};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

// ============================================================================
// Contracts
// ============================================================================

pub struct Calculator;

impl ServiceContract for Calculator {
    fn describe() -> InterfaceDescriptor {
        InterfaceDescriptor::service("ICalculator")
            .namespace("demo")
            .method(
                MethodDescriptor::operation("Add")
                    .param::<i32>("a")
                    .param::<i32>("b")
                    .context("options")
                    .returns::<i32>(),
            )
            .method(
                MethodDescriptor::operation("Negate")
                    .sync()
                    .param::<i32>("value")
                    .returns::<i32>(),
            )
            .method(
                MethodDescriptor::operation("Divide")
                    .param::<i32>("a")
                    .param::<i32>("b")
                    .returns::<i32>(),
            )
            .method(
                MethodDescriptor::operation("Sum")
                    .stream_param::<i32>("values")
                    .returns::<i32>(),
            )
            .method(
                MethodDescriptor::operation("Range")
                    .param::<i32>("count")
                    .returns_tuple(vec![
                        ReturnItemDescriptor::value::<i32>().named("total"),
                        ReturnItemDescriptor::stream::<i32>().named("values"),
                    ]),
            )
            .method(
                MethodDescriptor::operation("Countdown")
                    .param::<i32>("from")
                    .returns_stream::<i32>(),
            )
            .method(
                MethodDescriptor::operation("Scale")
                    .param::<i32>("factor")
                    .stream_param::<i32>("values")
                    .returns_stream::<i32>(),
            )
            .method(
                MethodDescriptor::operation("Ticks")
                    .cancellation("token")
                    .returns_stream::<u64>(),
            )
            .method(
                MethodDescriptor::operation("Slow")
                    .param::<u64>("millis")
                    .context("options"),
            )
            .method(
                MethodDescriptor::operation("Whoami")
                    .context("options")
                    .returns::<String>(),
            )
            .method(MethodDescriptor::operation("Unbound").returns::<i32>())
            .method(MethodDescriptor::plain("Helper").returns::<i32>())
    }
}

pub struct Greeter;

impl ServiceContract for Greeter {
    fn describe() -> InterfaceDescriptor {
        InterfaceDescriptor::service("IGreeter")
            .namespace("demo")
            .method(
                MethodDescriptor::operation("Greet")
                    .param::<String>("name")
                    .returns::<String>(),
            )
    }
}

/// Fault detail for a division by zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivideByZero {
    pub dividend: i32,
}

impl fmt::Display for DivideByZero {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot divide {} by zero", self.dividend)
    }
}

impl std::error::Error for DivideByZero {}

// ============================================================================
// Recording filter
// ============================================================================

pub type Log = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &Log) -> Vec<String> {
    log.lock().clone()
}

/// Appends `<name>-before` and `<name>-after` around the rest of the chain.
pub struct Recorder {
    pub name: &'static str,
    pub log: Log,
}

impl Recorder {
    pub fn new(name: &'static str, log: &Log) -> Self {
        Self {
            name,
            log: log.clone(),
        }
    }
}

impl Filter for Recorder {
    fn invoke(&self, ctx: &mut FilterContext, next: Next<'_>) -> Result<(), RpcError> {
        self.log.lock().push(format!("{}-before", self.name));
        let result = next.run(ctx);
        self.log.lock().push(format!("{}-after", self.name));
        result
    }

    fn invoke_async<'a>(
        &'a self,
        ctx: &'a mut FilterContext,
        next: AsyncNext<'a>,
    ) -> BoxFuture<'a, Result<(), RpcError>> {
        Box::pin(async move {
            self.log.lock().push(format!("{}-before", self.name));
            let result = next.run(ctx).await;
            self.log.lock().push(format!("{}-after", self.name));
            result
        })
    }
}

// ============================================================================
// Implementations
// ============================================================================

pub async fn add(args: Arguments) -> Result<Returns, RpcError> {
    let a: i32 = args.value_at(0)?;
    let b: i32 = args.value_at(1)?;
    Ok(Returns::single(a + b))
}

async fn divide(args: Arguments) -> Result<Returns, RpcError> {
    let a: i32 = args.value_at(0)?;
    let b: i32 = args.value_at(1)?;
    if b == 0 {
        return Err(RpcError::application(DivideByZero { dividend: a }));
    }
    Ok(Returns::single(a / b))
}

async fn sum(mut args: Arguments) -> Result<Returns, RpcError> {
    let mut values = args.take_stream(0)?.into_typed::<i32>();
    let mut total = 0;
    while let Some(value) = values.next().await {
        total += value?;
    }
    Ok(Returns::single(total))
}

async fn range(args: Arguments) -> Result<Returns, RpcError> {
    let count: i32 = args.value_at(0)?;
    Ok(Returns::unit()
        .with_value((0..count).sum::<i32>())
        .with_stream(ValueStream::from_iter(0..count)))
}

async fn countdown(args: Arguments) -> Result<Returns, RpcError> {
    let from: i32 = args.value_at(0)?;
    let items = (1..=from)
        .rev()
        .map(Ok::<i32, RpcError>)
        .chain(std::iter::once(Err(RpcError::application(DivideByZero {
            dividend: from,
        }))));
    Ok(Returns::stream(ValueStream::from_result_stream(
        futures::stream::iter(items),
    )))
}

async fn scale(mut args: Arguments) -> Result<Returns, RpcError> {
    let factor: i32 = args.value_at(0)?;
    let values = args.take_stream(1)?.into_typed::<i32>();
    Ok(Returns::stream(ValueStream::from_result_stream(
        values.map(move |value| value.map(|v| v * factor)),
    )))
}

async fn ticks(args: Arguments) -> Result<Returns, RpcError> {
    assert!(args.cancellation().is_some());
    let ticks = futures::stream::iter(0u64..).then(|tick| async move {
        tokio::time::sleep(Duration::from_millis(1)).await;
        tick
    });
    Ok(Returns::stream(ValueStream::from_stream(ticks)))
}

async fn slow(args: Arguments) -> Result<Returns, RpcError> {
    let millis: u64 = args.value_at(0)?;
    let token = args.cancellation().unwrap_or_default();
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(millis)) => Ok(Returns::unit()),
        _ = token.cancelled() => Err(RpcError::Cancelled),
    }
}

async fn whoami(args: Arguments) -> Result<Returns, RpcError> {
    let Some(ctx) = args.server_context() else {
        return Err(RpcError::status(Code::Internal, "no server context"));
    };
    let metadata = ctx.metadata();
    let user = metadata.get("x-user").unwrap_or("anonymous");
    let tenant = metadata.get("x-tenant").unwrap_or("none");
    let leaked = metadata.iter().any(|(key, _)| key.starts_with("x-fault-"));
    Ok(Returns::single(format!("{user}@{tenant} leaked={leaked}")))
}

async fn greet(args: Arguments) -> Result<Returns, RpcError> {
    let name: String = args.value_at(0)?;
    Ok(Returns::single(format!("hello {name}")))
}

pub fn calculator(log: &Log) -> ServiceBinding {
    let add_log = log.clone();
    let negate_log = log.clone();
    ServiceBinding::for_contract::<Calculator>()
        .unwrap()
        .on("Add", move |args: Arguments| {
            let log = add_log.clone();
            async move {
                log.lock().push("impl".to_string());
                add(args).await
            }
        })
        .on_sync("Negate", move |args: Arguments| {
            negate_log.lock().push("impl".to_string());
            Ok(Returns::single(-args.value_at::<i32>(0)?))
        })
        .on("Divide", divide)
        .on("Sum", sum)
        .on("Range", range)
        .on("Countdown", countdown)
        .on("Scale", scale)
        .on("Ticks", ticks)
        .on("Slow", slow)
        .on("Whoami", whoami)
}

pub fn greeter() -> ServiceBinding {
    ServiceBinding::for_contract::<Greeter>()
        .unwrap()
        .on("Greet", greet)
}

/// Turns [`DivideByZero`] errors into faults carrying the typed detail.
pub fn divide_faults(_ctx: &ServerCallContext, error: &RpcError) -> Option<Fault> {
    let RpcError::Application(source) = error else {
        return None;
    };
    let detail = source.downcast_ref::<DivideByZero>()?;
    let fault = Fault::new(Code::InvalidArgument, detail.to_string())
        .with_detail(FaultDetail::new(detail).ok()?);
    Some(fault)
}

pub fn host_builder(log: &Log) -> ServiceHostBuilder {
    ServiceHost::builder()
        .fault_handler(FnFaultHandler::new(divide_faults))
        .service(calculator(log))
        .unwrap()
        .service(greeter())
        .unwrap()
}

pub fn connect(host: ServiceHost) -> ClientBuilder {
    ContractClient::builder(InMemoryChannel::new(host)).fault_detail::<DivideByZero>()
}

/// A client over a default host.
pub fn client() -> ContractClient {
    connect(host_builder(&new_log()).build()).build()
}

/// A request stream fed one value at a time. It ends when the sender is
/// dropped, and the sender sees it closed once the call lets go of it.
pub fn open_requests() -> (mpsc::Sender<i32>, ValueStream) {
    let (tx, mut rx) = mpsc::channel(1);
    let requests = async_stream::stream! {
        while let Some(value) = rx.recv().await {
            yield value;
        }
    };
    (tx, ValueStream::from_stream(requests))
}
