use crate::model::{ColumnValue, Datum, Schema};
use crate::store::{ChangeSet, RowOp, RowStore};
use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Schema description for the demonstration switch: a singular System
/// root owning bridges, VRFs, and interfaces; ports owned by bridges and
/// addressable at the top level through the back-reference; VLANs keyed
/// by id under their bridge.
pub fn switch_schema() -> serde_json::Value {
    serde_json::json!({
        "name": "SwitchConfig",
        "version": "1.0.0",
        "tables": {
            "System": {
                "isRoot": true,
                "maxRows": 1,
                "columns": {
                    "hostname": {"category": "configuration", "type": "string"},
                    "other_config": {
                        "category": "configuration",
                        "type": {"key": "string", "value": "string",
                                 "min": 0, "max": "unlimited"}
                    },
                    "mgmt_intf_status": {
                        "category": "status",
                        "type": {"key": "string", "value": "string",
                                 "min": 0, "max": "unlimited"}
                    },
                    "statistics": {
                        "category": "statistics",
                        "type": {"key": "string", "value": "integer",
                                 "min": 0, "max": "unlimited"}
                    },
                    "bridges": {
                        "category": "configuration",
                        "relationship": "child",
                        "type": {"key": {"type": "uuid", "refTable": "Bridge"},
                                 "min": 0, "max": "unlimited"}
                    },
                    "vrfs": {
                        "category": "configuration",
                        "relationship": "child",
                        "type": {"key": {"type": "uuid", "refTable": "VRF"},
                                 "min": 0, "max": "unlimited"}
                    },
                    "interfaces": {
                        "category": "configuration",
                        "relationship": "child",
                        "type": {"key": {"type": "uuid", "refTable": "Interface"},
                                 "min": 0, "max": "unlimited"}
                    }
                }
            },
            "Bridge": {
                "indexes": ["name"],
                "columns": {
                    "name": {"category": "configuration", "mutable": false, "type": "string"},
                    "datapath_type": {
                        "category": "configuration",
                        "type": {"key": "string", "min": 0, "max": 1}
                    },
                    "flood_vlans": {
                        "category": "configuration",
                        "type": {"key": {"type": "integer",
                                         "minInteger": 1, "maxInteger": 4094},
                                 "min": 0, "max": "unlimited"}
                    },
                    "ports": {
                        "category": "configuration",
                        "relationship": "child",
                        "type": {"key": {"type": "uuid", "refTable": "Port"},
                                 "min": 0, "max": "unlimited"}
                    },
                    "vlans": {
                        "category": "configuration",
                        "relationship": "child",
                        "type": {"key": {"type": "integer"},
                                 "value": {"type": "uuid", "refTable": "VLAN"},
                                 "min": 0, "max": "unlimited"}
                    },
                    "status": {
                        "category": "status",
                        "type": {"key": "string", "value": "string",
                                 "min": 0, "max": "unlimited"}
                    }
                }
            },
            "Port": {
                "indexes": ["name"],
                "columns": {
                    "name": {"category": "configuration", "mutable": false, "type": "string"},
                    "admin": {
                        "category": "configuration",
                        "type": {"key": "string", "min": 0, "max": 1}
                    },
                    "tag": {
                        "category": "configuration",
                        "type": {"key": {"type": "integer",
                                         "minInteger": 1, "maxInteger": 4094},
                                 "min": 0, "max": 1}
                    },
                    "trunks": {
                        "category": "configuration",
                        "type": {"key": {"type": "integer",
                                         "minInteger": 1, "maxInteger": 4094},
                                 "min": 0, "max": "unlimited"}
                    },
                    "vlan_mode": {
                        "category": "configuration",
                        "type": {"key": "string", "min": 0, "max": 1}
                    },
                    "interfaces": {
                        "category": "configuration",
                        "relationship": "reference",
                        "type": {"key": {"type": "uuid", "refTable": "Interface"},
                                 "min": 0, "max": "unlimited"}
                    },
                    "statistics": {
                        "category": "statistics",
                        "type": {"key": "string", "value": "integer",
                                 "min": 0, "max": "unlimited"}
                    },
                    "status": {
                        "category": "status",
                        "type": {"key": "string", "value": "string",
                                 "min": 0, "max": "unlimited"}
                    }
                }
            },
            "Interface": {
                "indexes": ["name"],
                "columns": {
                    "name": {"category": "configuration", "mutable": false, "type": "string"},
                    "type": {"category": "configuration", "mutable": false, "type": "string"},
                    "user_config": {
                        "category": "configuration",
                        "type": {"key": "string", "value": "string",
                                 "min": 0, "max": "unlimited"}
                    },
                    "admin_state": {
                        "category": "status",
                        "type": {"key": "string", "min": 0, "max": 1}
                    },
                    "link_state": {
                        "category": "status",
                        "type": {"key": "string", "min": 0, "max": 1}
                    },
                    "link_speed": {
                        "category": "status",
                        "type": {"key": "integer", "min": 0, "max": 1}
                    },
                    "statistics": {
                        "category": "statistics",
                        "type": {"key": "string", "value": "integer",
                                 "min": 0, "max": "unlimited"}
                    }
                }
            },
            "VLAN": {
                "indexes": ["id"],
                "columns": {
                    "id": {"category": "configuration", "mutable": false,
                           "type": {"key": {"type": "integer",
                                            "minInteger": 1, "maxInteger": 4094}}},
                    "name": {"category": "configuration", "type": "string"},
                    "admin": {
                        "category": "configuration",
                        "type": {"key": "string", "min": 0, "max": 1}
                    },
                    "oper_state": {
                        "category": "status",
                        "type": {"key": "string", "min": 0, "max": 1}
                    }
                }
            },
            "VRF": {
                "indexes": ["name"],
                "columns": {
                    "name": {"category": "configuration", "mutable": false, "type": "string"},
                    "ports": {
                        "category": "configuration",
                        "relationship": "reference",
                        "type": {"key": {"type": "uuid", "refTable": "Port"},
                                 "min": 0, "max": "unlimited"}
                    },
                    "status": {
                        "category": "status",
                        "type": {"key": "string", "value": "string",
                                 "min": 0, "max": "unlimited"}
                    }
                }
            }
        }
    })
}

fn scalar_str(value: &str) -> ColumnValue {
    ColumnValue::Scalar(Datum::Str(value.to_string()))
}

fn scalar_int(value: i64) -> ColumnValue {
    ColumnValue::Scalar(Datum::Integer(value))
}

/// Insert the default rows every switch boots with: the System row, the
/// default bridge/VRF/VLAN, and the physical interfaces.
pub async fn load_seed_data(store: &dyn RowStore, schema: &Schema) -> Result<()> {
    let mut ops = Vec::new();

    let system = Uuid::new_v4();
    ops.push(RowOp::Insert {
        uuid: system,
        table: schema.root_table().name.clone(),
    });
    ops.push(RowOp::Set {
        uuid: system,
        column: "hostname".to_string(),
        value: scalar_str("switch"),
    });

    let bridge = Uuid::new_v4();
    ops.push(RowOp::Insert {
        uuid: bridge,
        table: "Bridge".to_string(),
    });
    ops.push(RowOp::Set {
        uuid: bridge,
        column: "name".to_string(),
        value: scalar_str("bridge_normal"),
    });

    let vrf = Uuid::new_v4();
    ops.push(RowOp::Insert {
        uuid: vrf,
        table: "VRF".to_string(),
    });
    ops.push(RowOp::Set {
        uuid: vrf,
        column: "name".to_string(),
        value: scalar_str("vrf_default"),
    });

    let vlan = Uuid::new_v4();
    ops.push(RowOp::Insert {
        uuid: vlan,
        table: "VLAN".to_string(),
    });
    ops.push(RowOp::Set {
        uuid: vlan,
        column: "id".to_string(),
        value: scalar_int(1),
    });
    ops.push(RowOp::Set {
        uuid: vlan,
        column: "name".to_string(),
        value: scalar_str("DEFAULT_VLAN_1"),
    });
    ops.push(RowOp::Set {
        uuid: vlan,
        column: "admin".to_string(),
        value: scalar_str("up"),
    });

    let mut interface_refs = Vec::new();
    for name in ["eth0", "eth1", "eth2", "eth3"] {
        let interface = Uuid::new_v4();
        ops.push(RowOp::Insert {
            uuid: interface,
            table: "Interface".to_string(),
        });
        ops.push(RowOp::Set {
            uuid: interface,
            column: "name".to_string(),
            value: scalar_str(name),
        });
        ops.push(RowOp::Set {
            uuid: interface,
            column: "type".to_string(),
            value: scalar_str("system"),
        });
        ops.push(RowOp::Set {
            uuid: interface,
            column: "admin_state".to_string(),
            value: scalar_str("down"),
        });
        interface_refs.push(Datum::Uuid(interface));
    }

    ops.push(RowOp::Set {
        uuid: system,
        column: "bridges".to_string(),
        value: ColumnValue::List(vec![Datum::Uuid(bridge)]),
    });
    ops.push(RowOp::Set {
        uuid: system,
        column: "vrfs".to_string(),
        value: ColumnValue::List(vec![Datum::Uuid(vrf)]),
    });
    ops.push(RowOp::Set {
        uuid: system,
        column: "interfaces".to_string(),
        value: ColumnValue::List(interface_refs),
    });
    ops.push(RowOp::Set {
        uuid: bridge,
        column: "vlans".to_string(),
        value: ColumnValue::Map(BTreeMap::from([(
            "1".to_string(),
            Datum::Uuid(vlan),
        )])),
    });

    let outcome = store
        .submit(ChangeSet { ops })
        .await
        .done
        .await
        .map_err(|_| anyhow!("seed commit signal lost"))?;
    if !outcome.status.is_success() {
        return Err(anyhow!(
            "seed data rejected: {}",
            outcome.message.unwrap_or_default()
        ));
    }
    Ok(())
}
