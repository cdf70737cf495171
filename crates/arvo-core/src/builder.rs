//! The emittable event builder (C8, spec §4.7): turns one raw machine emit
//! into N fully-validated, transport-ready events — one per resolved
//! domain in the multi-domain broadcast.
//!
//! Grounded on `chem-adapters::encoder::DomainArtifactEncoder` (translate a
//! raw internal value into validated wire artifacts) composed with
//! `chem-core::injection::composite::CompositeInjector::apply_injectors`'s
//! fan-out-and-accumulate pattern for the per-domain broadcast.

use arvo_model::contract::{validate_against_schema, VersionedContract};
use arvo_model::errors::{ViolationError, ViolationKind};
use arvo_model::event::Event;
use arvo_model::subject::{self, SubjectFields};

use crate::domain::{self, DomainContext, DomainToken};
use crate::engine::RawEmit;

/// Everything the builder needs to classify and assemble one raw emit
/// (spec §4.7). Borrowed for the lifetime of one `build` call.
pub struct BuildContext<'a> {
    pub self_contract: VersionedContract<'a>,
    /// Already version-resolved service contracts this orchestrator may
    /// call out to (matched against a raw emit's `type`).
    pub service_contracts: &'a [VersionedContract<'a>],
    pub source_event: &'a Event,
    /// The id of the event that started this workflow instance (spec §3:
    /// `initEventId`; used as completion events' `parentid`).
    pub init_event_id: &'a str,
    /// This orchestration instance's own subject (used as the child's
    /// `parentSubject$$` when a raw emit starts a nested orchestration, and
    /// as the default `subject` for ordinary service calls/passthroughs).
    pub current_subject: &'a str,
    /// Set only when this instance is itself nested: the subject of the
    /// enclosing orchestration (spec §4.7: completion routes to
    /// `parentSubject ?? sourceEvent.subject`).
    pub parent_subject: Option<&'a str>,
    pub orchestrator_source: &'a str,
    pub default_execution_units: f64,
}

/// Builds every emittable event for one raw machine emit.
pub fn build(raw: &RawEmit, ctx: &BuildContext<'_>) -> Result<Vec<Event>, ViolationError> {
    let classification = classify(raw, ctx)?;
    let domain_ctx = DomainContext {
        self_contract_domain: ctx.self_contract.domain.map(str::to_string),
        event_contract_domain: classification.event_contract_domain.clone(),
        triggering_event_domain: ctx.source_event.domain.clone(),
    };
    let resolved_domains = domain::resolve_many(&raw.domain, &domain_ctx);

    resolved_domains
        .into_iter()
        .map(|resolved_domain| assemble(raw, ctx, &classification, resolved_domain))
        .collect()
}

struct Classification {
    subject: String,
    parentid: String,
    to: Option<String>,
    dataschema: Option<String>,
    data: serde_json::Value,
    validation_schema: Option<serde_json::Value>,
    event_contract_domain: Option<String>,
    honor_id_override: bool,
}

fn classify(raw: &RawEmit, ctx: &BuildContext<'_>) -> Result<Classification, ViolationError> {
    if ctx.self_contract.complete_event_type() == Some(raw.event_type.as_str()) {
        return classify_completion(raw, ctx);
    }

    if let Some(service) = ctx.service_contracts.iter().find(|c| c.event_type == raw.event_type) {
        return classify_service_call(raw, ctx, *service);
    }

    Ok(Classification {
        subject: ctx.current_subject.to_string(),
        parentid: ctx.source_event.id.clone(),
        to: raw.to.clone(),
        dataschema: raw.dataschema.clone(),
        data: raw.data.clone(),
        validation_schema: None,
        event_contract_domain: None,
        honor_id_override: false,
    })
}

fn classify_completion(raw: &RawEmit, ctx: &BuildContext<'_>) -> Result<Classification, ViolationError> {
    let subject = ctx.parent_subject.unwrap_or(ctx.source_event.subject.as_str()).to_string();
    let parsed = subject::decode(&subject)?;
    let to = parsed.redirectto().map(str::to_string).or(Some(parsed.initiator.clone()));
    let schema = ctx.self_contract.emits(&raw.event_type).cloned();

    Ok(Classification {
        subject,
        parentid: ctx.init_event_id.to_string(),
        to,
        dataschema: Some(ctx.self_contract.dataschema()),
        data: raw.data.clone(),
        validation_schema: schema,
        event_contract_domain: ctx.self_contract.domain.map(str::to_string),
        honor_id_override: true,
    })
}

fn classify_service_call(raw: &RawEmit, ctx: &BuildContext<'_>, service: VersionedContract<'_>) -> Result<Classification, ViolationError> {
    if service.complete_event_type().is_some() {
        return classify_child_orchestration(raw, ctx, service);
    }

    Ok(Classification {
        subject: ctx.current_subject.to_string(),
        parentid: ctx.source_event.id.clone(),
        to: raw.to.clone(),
        dataschema: Some(service.dataschema()),
        data: raw.data.clone(),
        validation_schema: Some(service.accepts().clone()),
        event_contract_domain: service.domain.map(str::to_string),
        honor_id_override: false,
    })
}

fn classify_child_orchestration(raw: &RawEmit, ctx: &BuildContext<'_>, service: VersionedContract<'_>) -> Result<Classification, ViolationError> {
    let given = raw
        .data
        .get("parentSubject$$")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| raw.parent_subject.clone());

    if let Some(ref given_subject) = given {
        subject::decode(given_subject)
            .map_err(|_| ViolationError::execution(ViolationKind::InvalidParentSubject(given_subject.clone())))?;
    }

    let child_fields = SubjectFields::new(raw.event_type.clone(), service.version.to_string(), ctx.orchestrator_source.to_string())
        .with_meta("redirectto", ctx.orchestrator_source.to_string());
    let child_subject = subject::encode(&child_fields);

    let mut data = raw.data.clone();
    if let serde_json::Value::Object(ref mut map) = data {
        map.insert("parentSubject$$".to_string(), given.clone().map(serde_json::Value::String).unwrap_or(serde_json::Value::Null));
    }

    Ok(Classification {
        subject: child_subject,
        parentid: ctx.source_event.id.clone(),
        to: raw.to.clone(),
        dataschema: Some(service.dataschema()),
        data,
        validation_schema: Some(service.accepts().clone()),
        event_contract_domain: service.domain.map(str::to_string),
        honor_id_override: false,
    })
}

fn assemble(raw: &RawEmit, ctx: &BuildContext<'_>, classification: &Classification, resolved_domain: Option<String>) -> Result<Event, ViolationError> {
    if let Some(schema) = &classification.validation_schema {
        validate_against_schema(schema, &classification.data)?;
    }

    let mut builder = Event::builder(raw.event_type.clone(), classification.subject.clone(), classification.data.clone())
        .source(ctx.orchestrator_source)
        .parentid(classification.parentid.clone())
        .domain(resolved_domain)
        .executionunits(raw.executionunits.unwrap_or(ctx.default_execution_units))
        .redirectto(raw.redirectto.clone().unwrap_or_else(|| ctx.orchestrator_source.to_string()));

    if let Some(to) = &classification.to {
        builder = builder.to(to.clone());
    }
    if let Some(dataschema) = &classification.dataschema {
        builder = builder.dataschema(dataschema.clone());
    }
    if let Some(accesscontrol) = &raw.accesscontrol {
        builder = builder.accesscontrol(accesscontrol.clone());
    }
    if let Some(traceparent) = &ctx.source_event.traceparent {
        builder = builder.traceparent(traceparent.clone());
    }
    if let Some(tracestate) = &ctx.source_event.tracestate {
        builder = builder.tracestate(tracestate.clone());
    }
    if classification.honor_id_override {
        if let Some(id) = &raw.id_override {
            builder = builder.id(id.clone());
        }
    }

    Ok(builder.build())
}

/// Convenience helper for the nested-completion path (spec §4.8: "When the
/// machine produces `finalOutput`, the engine appends a synthetic raw event
/// of type `completeEventType`; its `domain` is
/// `[parentSubject.execution.domain]` if nested, else `[null]`").
pub fn completion_raw_emit(complete_event_type: &str, output: serde_json::Value, nested_domain: Option<String>) -> RawEmit {
    let mut emit = RawEmit::new(complete_event_type.to_string(), output);
    emit.domain = vec![match nested_domain {
        Some(d) => DomainToken::Literal(d),
        None => DomainToken::Local,
    }];
    emit
}

#[cfg(test)]
mod tests {
    use super::*;
    use arvo_model::contract::{Contract, VersionSpec};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn self_contract() -> Contract {
        Contract::new("#/inc/v1", "arvo.orc.inc", None).with_version(
            "1.0.0",
            VersionSpec {
                accepts: json!({"type": "object"}),
                emits: BTreeMap::from([("arvo.orc.inc.done".to_string(), json!({"type": "object"}))]),
                system_error: json!({"type": "object"}),
                orchestrator: Some(arvo_model::contract::OrchestratorVersionSpec {
                    complete_event_type: "arvo.orc.inc.done".to_string(),
                    init: json!({"type": "object"}),
                }),
            },
        )
    }

    fn service_contract() -> Contract {
        Contract::new("#/value/v1", "com.value.read", None).with_version(
            "1.0.0",
            VersionSpec {
                accepts: json!({"type": "object", "required": ["key"], "properties": {"key": {"type": "string"}}}),
                emits: BTreeMap::from([("evt.value.read.success".to_string(), json!({"type": "object"}))]),
                system_error: json!({"type": "object"}),
                orchestrator: None,
            },
        )
    }

    #[test]
    fn s1_root_orchestration_service_call() {
        let self_c = self_contract();
        let svc_c = service_contract();
        let self_v = self_c.version("1.0.0").unwrap();
        let svc_v = svc_c.version("1.0.0").unwrap();
        let init_subject = subject::encode(&SubjectFields::new("arvo.orc.inc", "1.0.0", "arvo.orc.inc"));
        let init_event = Event::builder("arvo.orc.inc", init_subject.clone(), json!({"key": "k", "modifier": 2}))
            .id("initId")
            .build();

        let ctx = BuildContext {
            self_contract: self_v,
            service_contracts: &[svc_v],
            source_event: &init_event,
            init_event_id: "initId",
            current_subject: &init_subject,
            parent_subject: None,
            orchestrator_source: "arvo.orc.inc",
            default_execution_units: 0.0,
        };

        let raw = RawEmit::new("com.value.read", json!({"key": "k"}));
        let events = build(&raw, &ctx).unwrap();
        assert_eq!(events.len(), 1);
        let ev = &events[0];
        assert_eq!(ev.to, "com.value.read");
        assert_eq!(ev.subject, init_subject);
        assert_eq!(ev.parentid.as_deref(), Some("initId"));
        assert_eq!(ev.source, "arvo.orc.inc");
    }

    #[test]
    fn s2_completion_routes_to_parent() {
        let self_c = self_contract();
        let self_v = self_c.version("1.0.0").unwrap();
        let parent_subject = subject::encode(&SubjectFields::new("arvo.orc.inc", "1.0.0", "arvo.orc.inc"));
        let continuation = Event::builder("evt.value.read.success", "SChild", json!({"value": 2}))
            .id("continuationId")
            .build();

        let ctx = BuildContext {
            self_contract: self_v,
            service_contracts: &[],
            source_event: &continuation,
            init_event_id: "initA",
            current_subject: "SChild",
            parent_subject: Some(&parent_subject),
            orchestrator_source: "arvo.orc.inc",
            default_execution_units: 0.0,
        };

        let raw = RawEmit::new("arvo.orc.inc.done", json!({"final": 4}));
        let events = build(&raw, &ctx).unwrap();
        assert_eq!(events.len(), 1);
        let ev = &events[0];
        assert_eq!(ev.subject, parent_subject);
        assert_eq!(ev.parentid.as_deref(), Some("initA"));
        assert_eq!(ev.to, "arvo.orc.inc");
    }

    #[test]
    fn s5_multi_domain_broadcast_dedups_preserving_order() {
        let self_c = Contract::new("#/a/v1", "arvo.orc.a", Some("a".to_string())).with_version(
            "1.0.0",
            VersionSpec { accepts: json!({}), emits: BTreeMap::new(), system_error: json!({}), orchestrator: None },
        );
        let self_v = self_c.version("1.0.0").unwrap();
        let subj = subject::encode(&SubjectFields::new("arvo.orc.a", "1.0.0", "arvo.orc.a"));
        let event = Event::builder("arvo.orc.a", subj.clone(), json!({})).id("e1").build();

        let ctx = BuildContext {
            self_contract: self_v,
            service_contracts: &[],
            source_event: &event,
            init_event_id: "e1",
            current_subject: &subj,
            parent_subject: None,
            orchestrator_source: "arvo.orc.a",
            default_execution_units: 0.0,
        };

        let mut raw = RawEmit::new("evt.x", json!({}));
        raw.domain = vec![
            DomainToken::Literal("a".to_string()),
            DomainToken::FromSelfContract,
            DomainToken::Local,
            DomainToken::Literal("a".to_string()),
        ];
        let events = build(&raw, &ctx).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].domain.as_deref(), Some("a"));
        assert_eq!(events[1].domain, None);
    }

    #[test]
    fn s6_child_orchestration_subject_and_invalid_parent() {
        let self_c = self_contract();
        let self_v = self_c.version("1.0.0").unwrap();
        let child_c = Contract::new("#/child/v1", "arvo.orc.child", None).with_version(
            "1.2.3",
            VersionSpec {
                accepts: json!({"type": "object"}),
                emits: BTreeMap::new(),
                system_error: json!({}),
                orchestrator: Some(arvo_model::contract::OrchestratorVersionSpec {
                    complete_event_type: "arvo.orc.child.done".into(),
                    init: json!({}),
                }),
            },
        );
        let child_v = child_c.version("1.2.3").unwrap();
        let subj = subject::encode(&SubjectFields::new("arvo.orc.inc", "1.0.0", "arvo.orc.inc"));
        let event = Event::builder("arvo.orc.inc", subj.clone(), json!({})).id("e1").build();

        let ctx = BuildContext {
            self_contract: self_v,
            service_contracts: &[child_v],
            source_event: &event,
            init_event_id: "e1",
            current_subject: &subj,
            parent_subject: None,
            orchestrator_source: "arvo.orc.inc",
            default_execution_units: 0.0,
        };

        let mut raw = RawEmit::new("arvo.orc.child", json!({"parentSubject$$": subj.clone()}));
        let events = build(&raw, &ctx).unwrap();
        let decoded = subject::decode(&events[0].subject).unwrap();
        assert_eq!(decoded.orchestrator_name, "arvo.orc.child");
        assert_eq!(decoded.orchestrator_version, "1.2.3");
        assert_eq!(decoded.initiator, "arvo.orc.inc");
        assert_eq!(decoded.redirectto(), Some("arvo.orc.inc"));

        raw.data = json!({"parentSubject$$": "not-a-subject"});
        let err = build(&raw, &ctx).unwrap_err();
        assert_eq!(err.category, arvo_model::errors::ViolationCategory::Execution);
    }
}
