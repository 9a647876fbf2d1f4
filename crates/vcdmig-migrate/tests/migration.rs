//! Whole migrations between two simulated platforms.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use vcdmig_client::{Platform, RecordedRequest, SimPlatform};
use vcdmig_domain::{Element, MigrationSettings, ObjectType, PollPolicy, Reference};
use vcdmig_migrate::{
    export_one, migrate_object, migrate_organization, BuildOutcome, Change, Containers, Locator, MigrateError,
    MigrationContext, ObjectRequest, ObjectSource, RunOptions, ScriptedPrompter,
};

struct Acme {
    source: SimPlatform,
    target: SimPlatform,
}

fn fixture(name: &str) -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name);
    std::fs::read_to_string(path).expect("fixture should exist")
}

fn routed_network(name: &str, edge_href: &str) -> Element {
    let xml = format!(
        r#"<OrgVdcNetwork xmlns="http://www.vmware.com/vcloud/v1.5" name="{name}" status="1">
          <Description>app tier</Description>
          <Configuration>
            <IpScopes><IpScope>
              <IsInherited>false</IsInherited>
              <Gateway>192.168.10.1</Gateway>
              <Netmask>255.255.255.0</Netmask>
              <IpRanges><IpRange><StartAddress>192.168.10.20</StartAddress><EndAddress>192.168.10.99</EndAddress></IpRange></IpRanges>
              <AllocatedIpAddresses><IpAddress>192.168.10.20</IpAddress></AllocatedIpAddresses>
            </IpScope></IpScopes>
            <FenceMode>natRouted</FenceMode>
            <RetainNetInfoAcrossDeployments>false</RetainNetInfoAcrossDeployments>
          </Configuration>
          <EdgeGateway href="{edge_href}" name="Acme-EGW" type="application/vnd.vmware.admin.edgeGateway+xml"/>
          <IsShared>false</IsShared>
        </OrgVdcNetwork>"#
    );
    Element::parse(&xml).expect("network fixture should parse")
}

/// Source: org Acme with role Operator, user alice, vdc Acme-VDC (Gold
/// default, Silver), gateway Acme-EGW and routed network Acme-Net1.
/// Target: the provider side only (rights, provider vdc, external network).
async fn acme() -> Acme {
    let source = SimPlatform::new("source");
    let target = SimPlatform::new("target");

    let pvdc = source
        .seed_provider_vdc("pvdc-gold", &[("*", true), ("Gold", true), ("Silver", true)], "pool-1")
        .await;
    let org = source.seed_org("Acme").await;
    let right = source.seed_right("vApp: View").await;
    let role = source.seed_role(&org, "Operator", &[("vApp: View", &right)]).await;
    let role_ref = Reference {
        name:     "Operator".into(),
        ref_type: Some(ObjectType::Role.media_type().into()),
        href:     role,
    };
    source.seed_user(&org, "alice", &role_ref).await;

    let vdc = source.seed_vdc(&org, "Acme-VDC", Some(&pvdc)).await;
    source.seed_vdc_storage_profile(&vdc, "Gold", 10240, true).await;
    source.seed_vdc_storage_profile(&vdc, "Silver", 5120, false).await;
    let edge = source
        .seed_edge_gateway(&vdc, Element::parse(&fixture("acme-egw.xml")).expect("gateway fixture should parse"))
        .await;
    source.seed_network(&vdc, routed_network("Acme-Net1", &edge)).await;

    target.seed_right("vApp: View").await;
    target
        .seed_provider_vdc(
            "pvdc-gold",
            &[("*", true), ("Gold", true), ("Silver", true), ("Bronze", false)],
            "pool-1",
        )
        .await;
    target.seed_external_network("Ext-Net").await;
    target.set_ready_after(1).await;

    Acme { source, target }
}

fn settings() -> MigrationSettings {
    MigrationSettings {
        poll: PollPolicy { interval: Duration::from_millis(1), max_attempts: 10 },
        vdc_settle_delay: Duration::ZERO,
        ..MigrationSettings::default()
    }
}

fn options() -> RunOptions {
    RunOptions { default_password: Some("s3cret".into()), assume_yes: true, rename_to: None }
}

fn context(acme: &Acme, options: RunOptions, prompter: ScriptedPrompter) -> MigrationContext {
    let source: Arc<dyn Platform> = Arc::new(acme.source.clone());
    let target: Arc<dyn Platform> = Arc::new(acme.target.clone());
    MigrationContext::new(Some(source), target, settings(), options, Box::new(prompter))
}

/// Local names of the bodies of every `method` request, in order.
fn bodies(requests: &[RecordedRequest], method: &str) -> Vec<String> {
    requests
        .iter()
        .filter(|r| r.method == method)
        .filter_map(|r| r.body.as_ref().map(|b| b.local_name().to_string()))
        .collect()
}

fn body_of<'a>(requests: &'a [RecordedRequest], method: &str, local_name: &str) -> &'a Element {
    requests
        .iter()
        .filter(|r| r.method == method)
        .filter_map(|r| r.body.as_ref())
        .find(|b| b.local_name() == local_name)
        .unwrap_or_else(|| panic!("no {} {} request", method, local_name))
}

fn flags(el: &Element) -> Vec<bool> {
    el.descendants_named("UseForDefaultRoute")
        .into_iter()
        .map(|f| f.text() == Some("true"))
        .collect()
}

fn interface_names(edge: &Element) -> Vec<String> {
    edge.find(&["Configuration", "GatewayInterfaces"])
        .map(|g| {
            g.children_named("GatewayInterface")
                .filter_map(|i| i.child_text("Name").map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn acme_organization_migrates_in_dependency_order() {
    let acme = acme().await;
    let mut ctx = context(&acme, options(), ScriptedPrompter::default());

    migrate_organization(&mut ctx, "Acme").await.unwrap();
    ctx.close().await;

    let requests = acme.target.requests().await;
    assert_eq!(
        bodies(&requests, "POST"),
        [
            "AdminOrg",
            "Role",
            "User",
            "CreateVdcParams",
            "UpdateVdcStorageProfiles",
            "UpdateVdcStorageProfiles",
            "EdgeGateway",
            "OrgVdcNetwork",
        ]
    );
    assert_eq!(bodies(&requests, "PUT"), ["AdminVdcStorageProfile", "AdminVdcStorageProfile", "EdgeGateway"]);

    // Local users get the run's default password; it is never stored.
    let user = body_of(&requests, "POST", "User");
    assert_eq!(user.child_text("Password"), Some("s3cret"));
    let stored = acme.target.objects("adminUser").await;
    assert_eq!(stored.len(), 1);
    assert!(stored[0].child("Password").is_none());

    // Every enabled provider profile is attached, the source default wins,
    // and the wildcard is gone.
    let profiles = acme.target.objects("adminOrgVdcStorageProfile").await;
    let names: Vec<_> = profiles.iter().filter_map(|p| p.attr("name")).collect();
    assert_eq!(names, ["Gold", "Silver"]);
    let defaults: Vec<_> = profiles
        .iter()
        .filter(|p| p.child_flag("Default") == Some(true))
        .filter_map(|p| p.attr("name"))
        .collect();
    assert_eq!(defaults, ["Gold"]);

    // Create phase: uplinks only, no default route, no disabled services.
    let create = body_of(&requests, "POST", "EdgeGateway");
    assert_eq!(interface_names(create), ["Ext-Net"]);
    assert!(flags(create).iter().all(|f| !f));
    assert_eq!(
        create.find(&["Configuration", "UseDefaultRouteForDnsRelay"]).and_then(|e| e.text()),
        Some("false")
    );
    let services = create
        .find(&["Configuration", "EdgeGatewayServiceConfiguration"])
        .unwrap();
    assert!(services.child("GatewayDhcpService").is_none());
    assert!(services.child("LoadBalancerService").is_none());
    assert_eq!(services.child("NatService").unwrap().children_named("NatRule").count(), 1);
    let description = create.child_text("Description").unwrap();
    assert!(!description.contains(['\n', '&', '<', '>']));

    // Edit phase: the internal interface is back and points at the target
    // network; exactly one interface and one subnet carry the default route.
    let network = acme.target.objects("orgVdcNetwork").await;
    assert_eq!(network.len(), 1);
    let network_href = network[0].attr("href").unwrap();
    let edit = body_of(&requests, "PUT", "EdgeGateway");
    assert_eq!(interface_names(edit), ["Ext-Net", "Acme-Net1"]);
    let ifaces: Vec<&Element> = edit
        .find(&["Configuration", "GatewayInterfaces"])
        .unwrap()
        .children_named("GatewayInterface")
        .collect();
    assert_eq!(ifaces[1].child("Network").unwrap().attr("href"), Some(network_href));
    assert_eq!(ifaces[0].child_flag("UseForDefaultRoute"), Some(true));
    assert_eq!(ifaces[1].child_flag("UseForDefaultRoute"), Some(false));
    let uplink_subnets: Vec<_> = ifaces[0]
        .children_named("SubnetParticipation")
        .map(|s| s.child_flag("UseForDefaultRoute"))
        .collect();
    assert_eq!(uplink_subnets, [Some(true), Some(false)]);
    assert_eq!(flags(ifaces[1]), [false, false]);

    assert!(ctx.report.changes.contains(&Change::Edited {
        object_type: ObjectType::EdgeGateway,
        name:        "Acme-EGW".into(),
    }));
    assert_eq!(ctx.report.created_count(), 6);
    assert!(acme.source.is_closed().await);
    assert!(acme.target.is_closed().await);
}

#[tokio::test]
async fn second_run_only_skips() {
    let acme = acme().await;
    let mut first = context(&acme, options(), ScriptedPrompter::default());
    migrate_organization(&mut first, "Acme").await.unwrap();
    let before = acme.target.requests().await.len();

    let mut second = context(&acme, options(), ScriptedPrompter::default());
    migrate_organization(&mut second, "Acme").await.unwrap();

    assert_eq!(second.report.created_count(), 0);
    assert_eq!(second.report.skipped_count(), 6);
    let after = acme.target.requests().await;
    assert!(after[before..]
        .iter()
        .all(|r| r.method == "GET" || r.method == "QUERY"));
}

#[tokio::test]
async fn declining_the_confirmation_stops_before_networks() {
    let acme = acme().await;
    let prompter = ScriptedPrompter::new(["n"]);
    let mut ctx = context(&acme, RunOptions { assume_yes: false, ..options() }, prompter);

    let err = migrate_organization(&mut ctx, "Acme").await.unwrap_err();
    assert!(matches!(err, MigrateError::Aborted));

    let posts = bodies(&acme.target.requests().await, "POST");
    assert!(posts.contains(&"CreateVdcParams".to_string()));
    assert!(!posts.contains(&"EdgeGateway".to_string()));
    assert!(!posts.contains(&"OrgVdcNetwork".to_string()));
}

#[tokio::test]
async fn network_without_its_gateway_on_the_target_is_not_submitted() {
    let acme = acme().await;
    let org = acme.target.seed_org("Acme").await;
    acme.target.seed_vdc(&org, "Acme-VDC", None).await;
    let mut ctx = context(&acme, options(), ScriptedPrompter::default());

    let request = ObjectRequest {
        object_type:   Some(ObjectType::OrgVdcNetwork),
        source:        ObjectSource::Platform(Locator::Name("Acme-Net1".into())),
        containers:    Containers { org: Some("Acme".into()), vdc: Some("Acme-VDC".into()) },
        services_only: false,
    };
    let err = migrate_object(&mut ctx, &request).await.unwrap_err();
    match err {
        MigrateError::ReferenceNotFound { object_type, name } => {
            assert_eq!(object_type, "edge_gateway");
            assert_eq!(name, "Acme-EGW");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(bodies(&acme.target.requests().await, "POST").is_empty());
}

#[tokio::test]
async fn services_only_reapplies_the_service_block() {
    let acme = acme().await;
    let mut ctx = context(&acme, options(), ScriptedPrompter::default());
    migrate_organization(&mut ctx, "Acme").await.unwrap();

    let request = ObjectRequest {
        object_type:   Some(ObjectType::EdgeGateway),
        source:        ObjectSource::Platform(Locator::Name("Acme-EGW".into())),
        containers:    Containers { org: Some("Acme".into()), vdc: Some("Acme-VDC".into()) },
        services_only: true,
    };
    let outcome = migrate_object(&mut ctx, &request).await.unwrap();
    assert!(matches!(outcome, BuildOutcome::ServicesReapplied { ref name, .. } if name == "Acme-EGW"));

    let requests = acme.target.requests().await;
    let last_post = requests.iter().rev().find(|r| r.method == "POST").unwrap();
    assert!(last_post.href.ends_with("/action/configureServices"));
    let body = last_post.body.as_ref().unwrap();
    assert_eq!(body.local_name(), "EdgeGatewayServiceConfiguration");
    // Disabled services are dropped, except a disabled load balancer.
    assert!(body.child("GatewayDhcpService").is_none());
    assert_eq!(body.child("LoadBalancerService").and_then(|l| l.child_flag("IsEnabled")), Some(false));
    assert_eq!(body.child("NatService").unwrap().children_named("NatRule").count(), 2);
}

/// A standby gateway no network points at; only its interface carries the
/// default-route flag.
fn spare_gateway() -> Element {
    Element::parse(
        r#"<EdgeGateway xmlns="http://www.vmware.com/vcloud/v1.5" name="Acme-Spare">
          <Description>standby</Description>
          <Configuration>
            <GatewayBackingConfig>compact</GatewayBackingConfig>
            <GatewayInterfaces>
              <GatewayInterface>
                <Name>Ext-Net</Name>
                <Network href="https://source.sim/api/admin/network/ext-net" name="Ext-Net"/>
                <InterfaceType>uplink</InterfaceType>
                <SubnetParticipation>
                  <Gateway>203.0.113.1</Gateway>
                  <Netmask>255.255.255.0</Netmask>
                  <IpAddress>203.0.113.20</IpAddress>
                </SubnetParticipation>
                <SubnetParticipation>
                  <Gateway>198.51.100.1</Gateway>
                  <Netmask>255.255.255.0</Netmask>
                  <IpAddress>198.51.100.20</IpAddress>
                  <UseForDefaultRoute>false</UseForDefaultRoute>
                </SubnetParticipation>
                <UseForDefaultRoute>true</UseForDefaultRoute>
              </GatewayInterface>
            </GatewayInterfaces>
          </Configuration>
        </EdgeGateway>"#,
    )
    .expect("spare gateway should parse")
}

#[tokio::test]
async fn unreferenced_gateway_is_created_and_edited() {
    let acme = acme().await;
    let vdc = acme.source.objects("adminOrgVdc").await[0]
        .attr("href")
        .unwrap()
        .to_string();
    acme.source.seed_edge_gateway(&vdc, spare_gateway()).await;

    let mut ctx = context(&acme, options(), ScriptedPrompter::default());
    migrate_organization(&mut ctx, "Acme").await.unwrap();

    let gateways: Vec<String> = acme
        .target
        .objects("edgeGateway")
        .await
        .iter()
        .filter_map(|g| g.attr("name").map(str::to_string))
        .collect();
    assert_eq!(gateways, ["Acme-EGW", "Acme-Spare"]);
    let edited: Vec<&str> = ctx
        .report
        .changes
        .iter()
        .filter_map(|c| match c {
            Change::Edited { name, .. } => Some(name.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(edited, ["Acme-EGW", "Acme-Spare"]);

    // Only the interface carried the flag; its first subnet takes the route.
    let requests = acme.target.requests().await;
    let spare_edit = requests
        .iter()
        .filter(|r| r.method == "PUT")
        .filter_map(|r| r.body.as_ref())
        .find(|b| b.local_name() == "EdgeGateway" && b.attr("name") == Some("Acme-Spare"))
        .expect("Acme-Spare should be edited");
    let uplink = spare_edit
        .find(&["Configuration", "GatewayInterfaces", "GatewayInterface"])
        .unwrap();
    assert_eq!(uplink.child_flag("UseForDefaultRoute"), Some(true));
    let subnets: Vec<_> = uplink
        .children_named("SubnetParticipation")
        .map(|s| s.child_flag("UseForDefaultRoute"))
        .collect();
    assert_eq!(subnets, [Some(true), Some(false)]);
}

#[tokio::test]
async fn exported_organization_imports_under_a_new_name() {
    let acme = acme().await;
    let dir = tempfile::tempdir().unwrap();
    let path = export_one(
        &acme.source,
        ObjectType::Organization,
        &Locator::Name("Acme".into()),
        &Containers::default(),
        dir.path(),
    )
    .await
    .unwrap();

    let target: Arc<dyn Platform> = Arc::new(acme.target.clone());
    let mut ctx = MigrationContext::new(
        None,
        target,
        settings(),
        RunOptions { rename_to: Some("Acme-Imported".into()), ..options() },
        Box::new(ScriptedPrompter::default()),
    );
    let request = ObjectRequest {
        object_type:   None,
        source:        ObjectSource::File(path),
        containers:    Containers::default(),
        services_only: false,
    };
    let outcome = migrate_object(&mut ctx, &request).await.unwrap();
    assert!(outcome.is_created());
    assert_eq!(outcome.name(), "Acme-Imported");

    let orgs = acme.target.objects("organization").await;
    assert_eq!(orgs.len(), 1);
    assert_eq!(orgs[0].attr("name"), Some("Acme-Imported"));
    assert_eq!(orgs[0].child_text("FullName"), Some("Acme"));
}

#[tokio::test]
async fn gateways_wait_for_networks_still_provisioning() {
    let acme = acme().await;
    let mut first = context(&acme, options(), ScriptedPrompter::default());
    migrate_organization(&mut first, "Acme").await.unwrap();

    let vdc = acme.source.objects("adminOrgVdc").await[0]
        .attr("href")
        .unwrap()
        .to_string();
    acme.source.seed_edge_gateway(&vdc, spare_gateway()).await;
    let network = acme.target.objects("orgVdcNetwork").await[0]
        .attr("href")
        .unwrap()
        .to_string();
    acme.target.set_pending(&network, 3).await;

    let mut second = context(&acme, options(), ScriptedPrompter::default());
    migrate_organization(&mut second, "Acme").await.unwrap();

    assert_eq!(acme.target.object(&network).await.unwrap().attr("status"), Some("1"));
    assert_eq!(second.report.created_count(), 1);
    assert!(second.report.changes.contains(&Change::Edited {
        object_type: ObjectType::EdgeGateway,
        name:        "Acme-Spare".into(),
    }));
}
