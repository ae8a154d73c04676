use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde_json::{Value, json};
use ulid::Ulid;

use crate::auth::require_business;
use crate::catalog::Business;
use crate::engine::{ActionAcceptance, AppointmentFilter, Engine, NewAppointment};
use crate::model::Actor;

use super::AppState;
use super::dto::*;
use super::error::{ApiError, ApiResult};

/// Engine and catalog record of one business.
struct Tenant {
    engine: Arc<Engine>,
    business: Business,
}

impl Tenant {
    fn tz(&self) -> chrono_tz::Tz {
        self.business.timezone
    }

    fn id(&self) -> Ulid {
        self.business.id
    }
}

async fn tenant(state: &AppState, business_id: Ulid) -> ApiResult<Tenant> {
    let business = state
        .tenants
        .catalog()
        .business(business_id)
        .await
        .map_err(|e| ApiError::engine(e, business_id, None))?
        .ok_or(ApiError::Engine(crate::engine::EngineError::not_found("business", business_id)))?;
    let engine = state
        .tenants
        .get_or_create(business_id)
        .await
        .map_err(|e| ApiError::engine(e, business_id, None))?;
    Ok(Tenant { engine, business })
}

/// Run a handler body and record its outcome.
async fn observed<T>(operation: &'static str, body: impl Future<Output = ApiResult<T>>) -> ApiResult<T> {
    let started = Instant::now();
    let result = body.await;
    let status = match &result {
        Ok(_) => "ok",
        Err(e) => e.label(),
    };
    crate::observability::record_operation(operation, status, started);
    result
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    body.map(|Json(v)| v).map_err(|e| ApiError::BadRequest(e.body_text()))
}

// ── Health ───────────────────────────────────────────────────────

pub async fn get_health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "tenants": state.tenants.len(),
        "uptime_secs": state.started.elapsed().as_secs(),
    }))
}

// ── Slots ────────────────────────────────────────────────────────

/// `GET /booking/slots?business_id&service_id&date[&resource_id]`
pub async fn get_slots(
    State(state): State<AppState>,
    query: Result<Query<SlotsQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    observed("available_slots", async move {
        let Query(q) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
        let business_id = parse_ulid("business_id", required("business_id", &q.business_id)?)?;
        let service_id = parse_ulid("service_id", required("service_id", &q.service_id)?)?;
        let date = parse_date("date", required("date", &q.date)?)?;
        let resource_id = q
            .resource_id
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .map(|r| parse_ulid("resource_id", r))
            .transpose()?;

        let t = tenant(&state, business_id).await?;
        let slots = t
            .engine
            .available_slots(service_id, date, resource_id, state.clock.now_ms())
            .await
            .map_err(|e| ApiError::engine(e, business_id, Some(service_id)))?;

        if slots.is_empty() {
            return Ok(Json(json!({ "message": "No available slots for this date" })));
        }
        let labels: Vec<String> = slots.iter().map(|s| s.label()).collect();
        Ok(Json(json!({ "slots": labels })))
    })
    .await
}

// ── Appointments ─────────────────────────────────────────────────

pub async fn book_appointment(
    State(state): State<AppState>,
    actor: Actor,
    Path(business_id): Path<String>,
    body: Result<Json<BookRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<AppointmentBody>)> {
    observed("book_appointment", async move {
        let business_id = parse_ulid("business_id", &business_id)?;
        let req = json_body(body)?;
        let customer_id = match (actor, req.customer_id) {
            (Actor::Customer(me), Some(other)) if other != me => {
                return Err(ApiError::Forbidden("customers can only book for themselves"));
            }
            (Actor::Customer(me), _) => me,
            (Actor::Business, Some(customer)) => customer,
            (Actor::Business, None) => return Err(ApiError::BadRequest("customer_id is required".into())),
        };
        let date = parse_date("date", required("date", &req.date)?)?;
        let time = parse_time("time", required("time", &req.time)?)?;

        let t = tenant(&state, business_id).await?;
        let start = local_instant(t.tz(), date.and_time(time))?;
        let appointment = t
            .engine
            .book_appointment(
                NewAppointment {
                    service_id: req.service_id,
                    customer_id,
                    resource_id: req.resource_id,
                    start,
                    notes: req.notes,
                },
                state.clock.now_ms(),
            )
            .await
            .map_err(|e| ApiError::engine(e, business_id, None))?;
        Ok((
            StatusCode::CREATED,
            Json(AppointmentBody {
                appointment: AppointmentView::new(&appointment, t.tz()),
            }),
        ))
    })
    .await
}

pub async fn list_appointments(
    State(state): State<AppState>,
    actor: Actor,
    Path(business_id): Path<String>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<AppointmentsBody>> {
    observed("list_appointments", async move {
        let business_id = parse_ulid("business_id", &business_id)?;
        let Query(q) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
        let t = tenant(&state, business_id).await?;
        let filter = AppointmentFilter {
            status: q.status,
            customer_id: None,
            from: q.from.as_deref().map(|f| parse_datetime("from", t.tz(), f)).transpose()?,
            to: q.to.as_deref().map(|f| parse_datetime("to", t.tz(), f)).transpose()?,
        };
        let appointments = t.engine.list_appointments(actor, &filter).await;
        Ok(Json(AppointmentsBody {
            appointments: appointments.iter().map(|a| AppointmentView::new(a, t.tz())).collect(),
        }))
    })
    .await
}

pub async fn get_appointment(
    State(state): State<AppState>,
    actor: Actor,
    Path((business_id, appointment_id)): Path<(String, String)>,
) -> ApiResult<Json<AppointmentBody>> {
    observed("get_appointment", async move {
        let business_id = parse_ulid("business_id", &business_id)?;
        let id = parse_ulid("appointment_id", &appointment_id)?;
        let t = tenant(&state, business_id).await?;
        let appointment = t
            .engine
            .get_appointment(id, actor)
            .await
            .map_err(|e| ApiError::engine(e, business_id, Some(id)))?;
        Ok(Json(AppointmentBody {
            appointment: AppointmentView::new(&appointment, t.tz()),
        }))
    })
    .await
}

pub async fn confirm_appointment(
    State(state): State<AppState>,
    actor: Actor,
    Path((business_id, appointment_id)): Path<(String, String)>,
) -> ApiResult<Json<AppointmentBody>> {
    observed("confirm_appointment", async move {
        require_business(actor)?;
        let business_id = parse_ulid("business_id", &business_id)?;
        let id = parse_ulid("appointment_id", &appointment_id)?;
        let t = tenant(&state, business_id).await?;
        let appointment = t
            .engine
            .confirm_appointment(id, actor, state.clock.now_ms())
            .await
            .map_err(|e| ApiError::engine(e, business_id, Some(id)))?;
        Ok(Json(AppointmentBody {
            appointment: AppointmentView::new(&appointment, t.tz()),
        }))
    })
    .await
}

pub async fn complete_appointment(
    State(state): State<AppState>,
    actor: Actor,
    Path((business_id, appointment_id)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Json<AppointmentBody>> {
    observed("complete_appointment", async move {
        require_business(actor)?;
        let business_id = parse_ulid("business_id", &business_id)?;
        let id = parse_ulid("appointment_id", &appointment_id)?;
        let req: CompleteRequest = optional_body(&body)?;
        let t = tenant(&state, business_id).await?;
        let appointment = t
            .engine
            .complete_appointment(id, actor, req.completion_notes, state.clock.now_ms())
            .await
            .map_err(|e| ApiError::engine(e, business_id, Some(id)))?;
        Ok(Json(AppointmentBody {
            appointment: AppointmentView::new(&appointment, t.tz()),
        }))
    })
    .await
}

pub async fn mark_no_show(
    State(state): State<AppState>,
    actor: Actor,
    Path((business_id, appointment_id)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Json<AppointmentBody>> {
    observed("mark_no_show", async move {
        require_business(actor)?;
        let business_id = parse_ulid("business_id", &business_id)?;
        let id = parse_ulid("appointment_id", &appointment_id)?;
        let req: NoShowRequest = optional_body(&body)?;
        let t = tenant(&state, business_id).await?;
        let appointment = t
            .engine
            .mark_no_show(id, actor, req.no_show_notes, state.clock.now_ms())
            .await
            .map_err(|e| ApiError::engine(e, business_id, Some(id)))?;
        Ok(Json(AppointmentBody {
            appointment: AppointmentView::new(&appointment, t.tz()),
        }))
    })
    .await
}

pub async fn cancel_appointment(
    State(state): State<AppState>,
    actor: Actor,
    Path((business_id, appointment_id)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Json<AppointmentBody>> {
    observed("cancel_appointment", async move {
        let business_id = parse_ulid("business_id", &business_id)?;
        let id = parse_ulid("appointment_id", &appointment_id)?;
        let req: CancelRequest = optional_body(&body)?;
        let t = tenant(&state, business_id).await?;
        let appointment = t
            .engine
            .cancel_appointment(id, actor, req.reason, state.clock.now_ms())
            .await
            .map_err(|e| ApiError::engine(e, business_id, Some(id)))?;
        Ok(Json(AppointmentBody {
            appointment: AppointmentView::new(&appointment, t.tz()),
        }))
    })
    .await
}

/// `POST .../appointments/{id}/reschedule` with `{newDate, newTime, reason?}`.
/// Responds with the replacement appointment.
pub async fn reschedule_appointment(
    State(state): State<AppState>,
    actor: Actor,
    Path((business_id, appointment_id)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Json<AppointmentBody>> {
    observed("reschedule_appointment", async move {
        let business_id = parse_ulid("business_id", &business_id)?;
        let id = parse_ulid("appointment_id", &appointment_id)?;
        let req: RescheduleRequest = optional_body(&body)?;
        let date = parse_date("newDate", required("newDate", &req.new_date)?)?;
        let time = parse_time("newTime", required("newTime", &req.new_time)?)?;

        let t = tenant(&state, business_id).await?;
        let new_start = local_instant(t.tz(), date.and_time(time))?;
        let replacement = t
            .engine
            .reschedule_appointment(id, actor, new_start, req.reason, state.clock.now_ms())
            .await
            .map_err(|e| ApiError::engine(e, business_id, Some(id)))?;
        Ok(Json(AppointmentBody {
            appointment: AppointmentView::new(&replacement, t.tz()),
        }))
    })
    .await
}

// ── Action-based appointment flow ────────────────────────────────

fn action_id(cmd: &ActionCommand) -> ApiResult<Ulid> {
    parse_ulid("action_id", required("action_id", &cmd.action_id)?)
}

/// `POST .../appointments/confirm`: accept one of an action's proposed times.
pub async fn confirm_action(
    State(state): State<AppState>,
    actor: Actor,
    Path(business_id): Path<String>,
    body: Result<Json<ActionCommand>, JsonRejection>,
) -> ApiResult<Json<ActionBody>> {
    observed("confirm_action", async move {
        let business_id = parse_ulid("business_id", &business_id)?;
        let cmd = json_body(body)?;
        let action_id = action_id(&cmd)?;
        let t = tenant(&state, business_id).await?;
        let start = cmd
            .datetime
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .map(|d| parse_datetime("datetime", t.tz(), d))
            .transpose()?;

        let (action, appointment) = t
            .engine
            .confirm_action(
                action_id,
                actor,
                ActionAcceptance {
                    start,
                    platform: cmd.platform,
                },
                state.clock.now_ms(),
            )
            .await
            .map_err(|e| ApiError::engine(e, business_id, Some(action_id)))?;
        Ok(Json(ActionBody {
            action: ActionView::new(&action, t.tz()),
            appointment: Some(AppointmentView::new(&appointment, t.tz())),
        }))
    })
    .await
}

pub async fn reject_action(
    State(state): State<AppState>,
    actor: Actor,
    Path(business_id): Path<String>,
    body: Result<Json<ActionCommand>, JsonRejection>,
) -> ApiResult<Json<ActionBody>> {
    observed("reject_action", async move {
        let business_id = parse_ulid("business_id", &business_id)?;
        let cmd = json_body(body)?;
        let action_id = action_id(&cmd)?;
        let t = tenant(&state, business_id).await?;
        let action = t
            .engine
            .reject_action(action_id, actor, cmd.reason, state.clock.now_ms())
            .await
            .map_err(|e| ApiError::engine(e, business_id, Some(action_id)))?;
        Ok(Json(ActionBody {
            action: ActionView::new(&action, t.tz()),
            appointment: None,
        }))
    })
    .await
}

pub async fn reschedule_action(
    State(state): State<AppState>,
    actor: Actor,
    Path(business_id): Path<String>,
    body: Result<Json<ActionCommand>, JsonRejection>,
) -> ApiResult<Json<ActionBody>> {
    observed("reschedule_action", async move {
        let business_id = parse_ulid("business_id", &business_id)?;
        let cmd = json_body(body)?;
        let action_id = action_id(&cmd)?;
        let t = tenant(&state, business_id).await?;
        let (action, appointment) = t
            .engine
            .request_action_reschedule(action_id, actor, cmd.reason, state.clock.now_ms())
            .await
            .map_err(|e| ApiError::engine(e, business_id, Some(action_id)))?;
        Ok(Json(ActionBody {
            action: ActionView::new(&action, t.tz()),
            appointment: appointment.map(|a| AppointmentView::new(&a, t.tz())),
        }))
    })
    .await
}

pub async fn cancel_action(
    State(state): State<AppState>,
    actor: Actor,
    Path(business_id): Path<String>,
    body: Result<Json<ActionCommand>, JsonRejection>,
) -> ApiResult<Json<ActionBody>> {
    observed("cancel_action", async move {
        let business_id = parse_ulid("business_id", &business_id)?;
        let cmd = json_body(body)?;
        let action_id = action_id(&cmd)?;
        let t = tenant(&state, business_id).await?;
        let (action, appointment) = t
            .engine
            .cancel_action(action_id, actor, cmd.reason, state.clock.now_ms())
            .await
            .map_err(|e| ApiError::engine(e, business_id, Some(action_id)))?;
        Ok(Json(ActionBody {
            action: ActionView::new(&action, t.tz()),
            appointment: appointment.map(|a| AppointmentView::new(&a, t.tz())),
        }))
    })
    .await
}

// ── Actions ──────────────────────────────────────────────────────

pub async fn record_action(
    State(state): State<AppState>,
    actor: Actor,
    Path(business_id): Path<String>,
    body: Result<Json<RecordActionRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ActionBody>)> {
    observed("record_action", async move {
        require_business(actor)?;
        let business_id = parse_ulid("business_id", &business_id)?;
        let req = json_body(body)?;
        let t = tenant(&state, business_id).await?;
        let action = t
            .engine
            .record_action(req.into_new_action(t.tz())?, state.clock.now_ms())
            .await
            .map_err(|e| ApiError::engine(e, t.id(), None))?;
        Ok((
            StatusCode::CREATED,
            Json(ActionBody {
                action: ActionView::new(&action, t.tz()),
                appointment: None,
            }),
        ))
    })
    .await
}

pub async fn list_actions(
    State(state): State<AppState>,
    actor: Actor,
    Path(business_id): Path<String>,
) -> ApiResult<Json<ActionsBody>> {
    observed("list_actions", async move {
        let business_id = parse_ulid("business_id", &business_id)?;
        let t = tenant(&state, business_id).await?;
        let actions = t.engine.list_actions(actor).await;
        Ok(Json(ActionsBody {
            actions: actions.iter().map(|a| ActionView::new(a, t.tz())).collect(),
        }))
    })
    .await
}

pub async fn get_action(
    State(state): State<AppState>,
    actor: Actor,
    Path((business_id, action_id)): Path<(String, String)>,
) -> ApiResult<Json<ActionBody>> {
    observed("get_action", async move {
        let business_id = parse_ulid("business_id", &business_id)?;
        let id = parse_ulid("action_id", &action_id)?;
        let t = tenant(&state, business_id).await?;
        let action = t
            .engine
            .get_action(id, actor)
            .await
            .map_err(|e| ApiError::engine(e, business_id, Some(id)))?;
        Ok(Json(ActionBody {
            action: ActionView::new(&action, t.tz()),
            appointment: None,
        }))
    })
    .await
}
