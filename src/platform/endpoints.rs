use chrono::NaiveDate;
use serde_json::{json, Map, Value};

/// A remote listing endpoint: where it lives, how it names its paging
/// parameters, and which envelope field carries the records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub name: &'static str,
    pub path: &'static str,
    pub page_param: &'static str,
    pub size_param: &'static str,
    pub data_field: &'static str,
}

/// Membership-card balances for the whole store.
pub const CARD_BALANCES: Endpoint = Endpoint {
    name: "card balances",
    path: "/WebApi/getListSYKSMembers.aspx",
    page_param: "pages",
    size_param: "psize",
    data_field: "data",
};

/// Top-up and renewal orders of one member.
pub const PAYMENTS: Endpoint = Endpoint {
    name: "payments",
    path: "/WebApi/getListOrderMvip.aspx",
    page_param: "pages",
    size_param: "psize",
    data_field: "data",
};

/// Free-text operational ledger of one member card.
pub const LEDGER: Endpoint = Endpoint {
    name: "operation ledger",
    path: "/WebApi/getListAdminHype.aspx",
    page_param: "pages",
    size_param: "psize",
    data_field: "data",
};

/// Store-wide card turnover summary. Not paginated.
pub const TURNOVER: Endpoint = Endpoint {
    name: "store turnover",
    path: "/WebApi/getCradTurnover.aspx",
    page_param: "",
    size_param: "",
    data_field: "listall",
};

/// Cheap schedule listing used only to probe whether a token is accepted.
pub const TOKEN_PROBE: Endpoint = Endpoint {
    name: "token probe",
    path: "/WebApi/getListRowClassNew.aspx",
    page_param: "",
    size_param: "",
    data_field: "data",
};

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Card listing filter set: every stored-value card of the store, no amount
/// or expiry restriction.
pub fn card_listing_params(store_id: &str) -> Map<String, Value> {
    object(json!({
        "StoresID": store_id,
        "SelectName": "",
        "CardType": "4",
        "OderType": "1",
        "CardDays1": "0",
        "CardDays2": "0",
        "Amount1": "99999",
        "Amount2": "0",
        "CardNumber1": "30",
        "CardNumber2": "0",
        "selectCardID": "",
    }))
}

pub fn payment_params(store_id: &str, entity_id: &str) -> Map<String, Value> {
    object(json!({
        "StoresID": store_id,
        "MembersvipID": entity_id,
    }))
}

pub fn ledger_params(entity_id: &str, card_id: &str) -> Map<String, Value> {
    object(json!({
        "MembersvipID": entity_id,
        "MembersID": card_id,
    }))
}

pub fn turnover_params(store_id: &str, since: NaiveDate, until: NaiveDate) -> Map<String, Value> {
    object(json!({
        "StoresID": store_id,
        "Stime": since.format("%Y-%m-%d").to_string(),
        "Etime": until.format("%Y-%m-%d").to_string(),
        "stype": "4",
        "SelectCardID": "",
    }))
}

pub fn token_probe_params(store_id: &str) -> Map<String, Value> {
    object(json!({
        "StoresID": store_id,
        "isweek": "0",
        "dateTime": "",
        "RowClassType": "0",
        "ClassTeacher": "",
        "CourseID": "",
        "SelectClass": "1",
        "ClassID": "",
        "RowType": 0,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turnover_params_dates() {
        let since = NaiveDate::from_ymd_opt(2025, 5, 28).unwrap();
        let until = NaiveDate::from_ymd_opt(2025, 6, 30).unwrap();
        let params = turnover_params("1517", since, until);
        assert_eq!(params["Stime"], "2025-05-28");
        assert_eq!(params["Etime"], "2025-06-30");
        assert_eq!(params["StoresID"], "1517");
    }

    #[test]
    fn test_ledger_params_carry_both_ids() {
        let params = ledger_params("478926", "c-1");
        assert_eq!(params["MembersvipID"], "478926");
        assert_eq!(params["MembersID"], "c-1");
    }
}
