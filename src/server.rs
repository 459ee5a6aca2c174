//! HTTP control surface for benchmark sessions.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::config::{DEFAULT_LOOPS, DEFAULT_RUNS};
use crate::error::BenchError;
use crate::session::{run_session, SessionPlan};
use crate::sys_info::SystemSnapshot;
use crate::thread_manager::{
    finish_task, get_task, list_tasks, new_registry, next_task_id,
    record_event, register_task, stop_task, TaskRegistry,
};
use crate::worker::{global_worker, BenchmarkWorker};

#[derive(Deserialize)]
struct TestParams {
    iterations: Option<u64>,
    runs: Option<u32>,
}

pub struct EngineState {
    registry: TaskRegistry,
    worker: BenchmarkWorker,
}

impl EngineState {
    pub fn new(worker: BenchmarkWorker) -> Self {
        Self {
            registry: new_registry(),
            worker,
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }
}

fn error_body(err: &BenchError) -> serde_json::Value {
    json!({ "error": err.to_string() })
}

async fn start_pystone(
    state: web::Data<EngineState>,
    params: web::Json<TestParams>,
) -> impl Responder {
    let plan = match SessionPlan::new(
        params.iterations.unwrap_or(DEFAULT_LOOPS),
        params.runs.unwrap_or(DEFAULT_RUNS),
    ) {
        Ok(plan) => plan,
        Err(err) => return HttpResponse::BadRequest().json(error_body(&err)),
    };
    if state.worker.is_busy() {
        return HttpResponse::Conflict().json(error_body(&BenchError::Busy));
    }

    let id = next_task_id();
    let stop_flag = Arc::new(AtomicBool::new(false));
    if let Err(err) = register_task(&state.registry, &id, plan, Arc::clone(&stop_flag)) {
        return HttpResponse::Conflict().json(error_body(&err));
    }
    info!(
        task = %id,
        iterations = plan.iterations,
        runs = plan.runs,
        "starting pystone session"
    );

    let registry = Arc::clone(&state.registry);
    let worker = state.worker.clone();
    let task_id = id.clone();
    tokio::spawn(async move {
        let events = Arc::clone(&registry);
        let events_id = task_id.clone();
        let outcome = run_session(&worker, plan, stop_flag, move |event| {
            record_event(&events, &events_id, &event)
        })
        .await;
        if let Err(err) = &outcome {
            warn!(task = %task_id, error = %err, "pystone session failed");
        }
        finish_task(&registry, &task_id, &outcome);
    });

    HttpResponse::Accepted().json(json!({ "id": id }))
}

async fn stop(state: web::Data<EngineState>, path: web::Path<String>) -> impl Responder {
    let id = path.into_inner();
    if stop_task(&id, &state.registry) {
        info!(task = %id, "stop requested");
        HttpResponse::Ok().json(json!({ "id": id, "stopping": true }))
    } else {
        HttpResponse::NotFound().json(json!({ "error": format!("unknown task {id}") }))
    }
}

async fn tasks(state: web::Data<EngineState>) -> impl Responder {
    HttpResponse::Ok().json(list_tasks(&state.registry))
}

async fn task(state: web::Data<EngineState>, path: web::Path<String>) -> impl Responder {
    let id = path.into_inner();
    match get_task(&id, &state.registry) {
        Some(task) => HttpResponse::Ok().json(task),
        None => HttpResponse::NotFound().json(json!({ "error": format!("unknown task {id}") })),
    }
}

async fn system() -> impl Responder {
    match web::block(SystemSnapshot::capture).await {
        Ok(snapshot) => HttpResponse::Ok().json(snapshot),
        Err(err) => HttpResponse::InternalServerError().json(json!({ "error": err.to_string() })),
    }
}

async fn health() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/pystone", web::post().to(start_pystone))
        .route("/stop/{id}", web::post().to(stop))
        .route("/tasks", web::get().to(tasks))
        .route("/tasks/{id}", web::get().to(task))
        .route("/system", web::get().to(system))
        .route("/health", web::get().to(health));
}

/// Serves the engine on `bind` using the process-wide worker.
pub async fn serve(bind: &str) -> std::io::Result<()> {
    let state = web::Data::new(EngineState::new(global_worker().clone()));
    info!(%bind, "pystone engine listening");

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .max_age(3600),
            )
            .app_data(state.clone())
            .configure(configure)
    })
    .bind(bind)?
    .run()
    .await
}
