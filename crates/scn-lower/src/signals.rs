use std::collections::BTreeMap;

use scn_core::{Route, RouteKind, SignalPhases, SignalTimeline};
use scn_parser::XmlElementNode;
use tracing::debug;

use crate::context::LowerContext;

/// Parameter whose presence switches controllers to their compact encoding.
pub const ACTIVE_PLAN_PARAMETER: &str = "ActivePlan";
const DEFAULT_PLAN: &str = "1";

/// Splits `key:value;key:value` into a map.
///
/// Commas inside `phase` and `lane` separate list items and become `;`.
pub fn split_compact(encoded: &str) -> BTreeMap<String, String> {
    encoded
        .split(';')
        .filter(|item| !item.is_empty())
        .map(|item| {
            let (key, value) = item.split_once(':').unwrap_or((item, ""));
            let value = match key {
                "phase" | "lane" => value.replace(',', ";"),
                _ => value.to_string(),
            };
            (key.to_string(), value)
        })
        .collect()
}

/// Builds one timeline per `TrafficSignalController` of a `RoadNetwork`.
///
/// Routes named by compact encodings are added to `routes`, once per
/// authored route id.
pub fn build_signals(
    ctx: &mut LowerContext<'_>,
    network: &XmlElementNode,
    routes: &mut BTreeMap<u32, Route>,
) -> BTreeMap<u32, SignalTimeline> {
    let Some(signals) = network.child("TrafficSignals") else {
        return BTreeMap::new();
    };
    let active_plan = ctx
        .params
        .get(ACTIVE_PLAN_PARAMETER)
        .map(|parameter| parameter.value.clone());
    let mut registered = BTreeMap::<String, u32>::new();
    let mut timelines = BTreeMap::new();

    for controller in signals.children_named("TrafficSignalController") {
        let name = ctx.attr_or(controller, "name", "");
        let phases = controller.children_named("Phase").collect::<Vec<_>>();
        let signal_heads = phases
            .first()
            .map(|phase| {
                phase
                    .children_named("TrafficSignalState")
                    .filter_map(|state| state.attr("trafficSignalId"))
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let mut timeline = SignalTimeline {
            id: ctx.ids.next_signal(),
            controller: name.clone(),
            signal_heads,
            ..SignalTimeline::default()
        };

        match &active_plan {
            Some(plan) => {
                timeline.plan = plan.clone();
                timeline.phases = phase_durations(ctx, &phases, &["stop"], &["go"], &["attention"]);
                let compact = ctx
                    .params
                    .get(&format!("TrafficInfo_{}", name))
                    .map(|parameter| split_compact(&parameter.value))
                    .unwrap_or_default();
                apply_compact(ctx, &mut timeline, &compact, routes, &mut registered);
                timeline.compact = compact;
            }
            None => {
                timeline.plan = DEFAULT_PLAN.to_string();
                timeline.phases =
                    phase_durations(ctx, &phases, &["red"], &["green", "go"], &["yellow", "blink"]);
            }
        }

        debug!(
            controller = %timeline.controller,
            id = timeline.id,
            heads = timeline.signal_heads.len(),
            "signal timeline built"
        );
        timelines.insert(timeline.id, timeline);
    }
    timelines
}

fn phase_durations(
    ctx: &mut LowerContext<'_>,
    phases: &[&XmlElementNode],
    red: &[&str],
    green: &[&str],
    yellow: &[&str],
) -> SignalPhases {
    let mut durations = SignalPhases::default();
    for phase in phases {
        let name = ctx.attr_or(phase, "name", "");
        let duration = ctx.value(phase, "duration");
        if red.contains(&name.as_str()) {
            durations.red = duration;
        }
        if green.contains(&name.as_str()) {
            durations.green = duration;
        }
        if yellow.contains(&name.as_str()) {
            durations.yellow = duration;
        }
    }
    durations
}

fn apply_compact(
    ctx: &mut LowerContext<'_>,
    timeline: &mut SignalTimeline,
    compact: &BTreeMap<String, String>,
    routes: &mut BTreeMap<u32, Route>,
    registered: &mut BTreeMap<String, u32>,
) {
    let field = |key: &str| compact.get(key).cloned();
    timeline.junction_id = field("junctionid");
    timeline.lane_offset = field("l_offset");
    timeline.phase = field("phase");
    timeline.status = field("status");
    timeline.phase_number = field("phaseNumber");
    timeline.lanes = field("lane");
    if let Some(plan) = field("plan") {
        timeline.plan = plan;
    }
    if let Some(start) = field("start_t") {
        timeline.start_time = start;
    }

    let Some(route_key) = field("routeid") else {
        return;
    };
    let route_id = match registered.get(&route_key) {
        Some(id) => *id,
        None => {
            let id = ctx.ids.next_route();
            routes.insert(
                id,
                Route {
                    id,
                    owner: timeline.controller.clone(),
                    kind: RouteKind::SignalApproach,
                    start: field("route").unwrap_or_default(),
                    end: None,
                    mids: String::new(),
                    path: Vec::new(),
                },
            );
            registered.insert(route_key, id);
            id
        }
    };
    timeline.route_id = Some(route_id);
}

/// Applies an init `TrafficSignalControllerAction`: the named controller
/// starts in the given phase.
pub fn apply_controller_action(
    ctx: &mut LowerContext<'_>,
    signals: &mut BTreeMap<u32, SignalTimeline>,
    action: &XmlElementNode,
) {
    let controller = ctx.attr_or(action, "trafficSignalControllerRef", "");
    let phase = ctx.attr_or(action, "phase", "");
    match signals
        .values_mut()
        .find(|timeline| timeline.controller == controller)
    {
        Some(timeline) => timeline.start_time = phase,
        None => ctx.warn(
            "UNKNOWN_SIGNAL",
            format!("signal controller \"{}\" is not declared", controller),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::EmptyCatalog;
    use crate::config::LoweringConfig;
    use crate::projection::PlanarProjection;
    use scn_core::ParameterKind;
    use scn_parser::parse_xml_document;

    const NETWORK: &str = r#"<RoadNetwork><TrafficSignals>
        <TrafficSignalController name="100">
            <Phase name="stop" duration="30"><TrafficSignalState trafficSignalId="s1" state="true;false;false"/><TrafficSignalState trafficSignalId="s2" state="true;false;false"/></Phase>
            <Phase name="go" duration="25"/>
            <Phase name="attention" duration="3"/>
        </TrafficSignalController>
        <TrafficSignalController name="101">
            <Phase name="red" duration="20"><TrafficSignalState trafficSignalId="s3" state="true;false;false"/></Phase>
            <Phase name="blink" duration="4"/>
        </TrafficSignalController>
    </TrafficSignals></RoadNetwork>"#;

    fn network() -> XmlElementNode {
        parse_xml_document(NETWORK).expect("xml should parse").root
    }

    #[test]
    fn compact_encoding_splits_pairs_and_rewrites_list_commas() {
        let compact = split_compact("routeid:7;route:113.1,28.2,0;phase:1,2;lane:-1,-2;start_t:5;");
        assert_eq!(compact["routeid"], "7");
        assert_eq!(compact["route"], "113.1,28.2,0");
        assert_eq!(compact["phase"], "1;2");
        assert_eq!(compact["lane"], "-1;-2");
        assert_eq!(compact.len(), 5);
    }

    #[test]
    fn plain_controllers_read_named_phases() {
        let config = LoweringConfig::default();
        let projection = PlanarProjection::default();
        let mut ctx = LowerContext::new(&config, &EmptyCatalog, &projection);
        let mut routes = BTreeMap::new();
        let signals = build_signals(&mut ctx, &network(), &mut routes);
        assert_eq!(signals.len(), 2);
        let second = &signals[&2];
        assert_eq!(second.controller, "101");
        assert_eq!(second.plan, "1");
        assert_eq!(second.phases.red, 20.0);
        assert_eq!(second.phases.yellow, 4.0);
        assert_eq!(second.signal_heads, vec!["s3".to_string()]);
        let first = &signals[&1].phases;
        assert_eq!(first.red, 0.0);
        assert_eq!(first.green, 25.0);
        assert_eq!(first.yellow, 0.0);
        assert!(routes.is_empty());
    }

    #[test]
    fn unrecognized_phase_names_leave_durations_at_zero() {
        let config = LoweringConfig::default();
        let projection = PlanarProjection::default();
        let mut ctx = LowerContext::new(&config, &EmptyCatalog, &projection);
        let network = parse_xml_document(
            r#"<RoadNetwork><TrafficSignals>
                <TrafficSignalController name="200">
                    <Phase name="hold" duration="40"/>
                    <Phase name="release" duration="15"/>
                </TrafficSignalController>
            </TrafficSignals></RoadNetwork>"#,
        )
        .expect("xml should parse")
        .root;
        let mut routes = BTreeMap::new();
        let signals = build_signals(&mut ctx, &network, &mut routes);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[&1].phases, SignalPhases::default());
    }

    #[test]
    fn active_plan_uses_compact_parameters_and_registers_routes_once() {
        let config = LoweringConfig::default();
        let projection = PlanarProjection::default();
        let mut ctx = LowerContext::new(&config, &EmptyCatalog, &projection);
        ctx.params.declare("ActivePlan", ParameterKind::String, "2");
        ctx.params.declare(
            "TrafficInfo_100",
            ParameterKind::String,
            "routeid:9;route:113,28,0;junctionid:J1;plan:3;start_t:12;phase:1,2",
        );
        ctx.params.declare(
            "TrafficInfo_101",
            ParameterKind::String,
            "routeid:9;route:113,28,0",
        );
        let mut routes = BTreeMap::new();
        let signals = build_signals(&mut ctx, &network(), &mut routes);
        let first = &signals[&1];
        assert_eq!(first.phases.red, 30.0);
        assert_eq!(first.phases.green, 25.0);
        assert_eq!(first.phases.yellow, 3.0);
        assert_eq!(first.plan, "3");
        assert_eq!(first.start_time, "12");
        assert_eq!(first.junction_id.as_deref(), Some("J1"));
        assert_eq!(first.phase.as_deref(), Some("1;2"));
        assert_eq!(first.signal_heads.len(), 2);
        assert_eq!(signals[&2].plan, "2");
        assert_eq!(routes.len(), 1);
        assert_eq!(first.route_id, signals[&2].route_id);
        assert_eq!(routes[&0].kind, RouteKind::SignalApproach);
    }

    #[test]
    fn controller_action_sets_start_phase() {
        let config = LoweringConfig::default();
        let projection = PlanarProjection::default();
        let mut ctx = LowerContext::new(&config, &EmptyCatalog, &projection);
        let mut routes = BTreeMap::new();
        let mut signals = build_signals(&mut ctx, &network(), &mut routes);
        let action = parse_xml_document(
            r#"<TrafficSignalControllerAction trafficSignalControllerRef="101" phase="green"/>"#,
        )
        .expect("xml should parse")
        .root;
        apply_controller_action(&mut ctx, &mut signals, &action);
        assert_eq!(signals[&2].start_time, "green");
        let unknown = parse_xml_document(
            r#"<TrafficSignalControllerAction trafficSignalControllerRef="999" phase="red"/>"#,
        )
        .expect("xml should parse")
        .root;
        apply_controller_action(&mut ctx, &mut signals, &unknown);
        assert!(ctx.diagnostics.has_code("UNKNOWN_SIGNAL"));
    }
}
