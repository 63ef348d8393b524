//! IIoT project records: the customer, the field survey of its factory, and
//! the deployable factory model produced during integration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── Customer ───────────────────────────────────────────────────

/// A customer of the IIoT project and the stage its project is in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Customer {
    /// Unique identifier for the customer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    /// Full name of the customer or organization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Industry sector, e.g. automotive, semiconductor, food_beverage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    /// General notes about this customer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Project status of the customer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<CustomerStatus>,
    /// Edge services associated with this customer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_context: Option<EdgeContext>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CustomerStatus {
    SurveyPending,
    SurveyInProgress,
    SurveyCompleted,
    QuotationReady,
    IntegrationInProgress,
    IntegrationCompleted,
    Finalized,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EdgeContext {
    /// Unique identifier for the edge services.
    pub edge_id: String,
}

// ── Survey ─────────────────────────────────────────────────────

/// Field survey of a customer's factory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SurveyFactory {
    /// Unique identifier for the survey.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub survey_id: Option<String>,
    /// Client factory name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory_name: Option<String>,
    /// Date of the site visit in RFC3339 format with timezone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub survey_date: Option<String>,
    /// ID of the customer this survey belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    /// Surveyed areas. Machines without a stated area go to a common area.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub areas: Vec<SurveyArea>,
    /// Additional metadata collected during the survey.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra_data: Map<String, Value>,
}

/// A logical or physical area of the surveyed site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SurveyArea {
    /// Logical area code (e.g. A, B, C).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Area name such as Line 1 or Warehouse Zone.
    pub name: String,
    /// Whether this area is expected to become a production line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_production_line: Option<bool>,
    /// Machine templates in the area. Identical machines share one entry
    /// with `quantity` > 1.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub machines: Vec<SurveyMachine>,
}

/// A machine template observed during the survey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SurveyMachine {
    /// Machine type or model name, e.g. Boiler, CNC Machine.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Number of identical machines of this type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    /// Individual IDs for each machine instance; length should match quantity.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub planned_machine_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub controllers: Vec<SurveyController>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SurveyController {
    /// Field label or tag name of the controller.
    pub name: String,
    /// Type of controller observed, e.g. PLC, CNC, Sensor Node, Gateway.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Communication protocol used by the controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub points: Vec<SurveyPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SurveyPoint {
    /// Field label or tag name of the point.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Observed or assumed address, e.g. I0.0, 40001.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_type: Option<SignalType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum SignalType {
    Digital,
    Analog,
}

// ── Factory ────────────────────────────────────────────────────

/// Deployable factory model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Factory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Geographical location of the factory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub production_lines: Vec<ProductionLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProductionLine {
    pub line_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<OperationalStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub machines: Vec<Machine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Machine {
    pub machine_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<OperationalStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub controllers: Vec<Controller>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OperationalStatus {
    Idle,
    Starting,
    Running,
    Paused,
    Stopped,
    Fault,
    Maintenance,
    EmergencyStop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Controller {
    pub controller_id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ControllerType>,
    /// Manufacturer, e.g. siemens, mitsubishi, omron.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// e.g. modbus_tcp, opcua, mqtt, mc.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// Driver used to talk to the controller, e.g. modbus, opcua.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    /// Network address or identifier of the controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub points: Vec<Point>,
    /// Driver-specific configuration.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ControllerType {
    Plc,
    Cnc,
    SensorNode,
    Gateway,
    EdgeDevice,
    RemoteIo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Point {
    pub name: String,
    /// Human-readable name of the point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<PointType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<AccessMode>,
    /// Measurement unit, e.g. °C, rpm, kW.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Driver-specific addressing, e.g. {"register": "holding", "address": 0}.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PointType {
    Bool,
    Int,
    Float,
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}
