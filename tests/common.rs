//! Synthetic KLARF generator shared by the integration tests.

#![allow(dead_code)]

/// Builder for small well-formed KLARF files.
#[derive(Clone, Debug)]
pub struct SyntheticKlarf {
    pub pitch: (f64, f64),
    pub size_mm: u32,
    pub center: (f64, f64),
    pub plan: Vec<(i64, i64)>,
    pub fields: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Written after `DefectList` on the keyword line when set.
    pub declared: Option<usize>,
}

impl SyntheticKlarf {
    pub fn new(fields: &[&str]) -> Self {
        Self {
            pitch: (10000.0, 10000.0),
            size_mm: 300,
            center: (5000.0, 5000.0),
            plan: vec![(0, 0), (1, 0), (0, 1), (1, 1)],
            fields: fields.iter().map(|f| f.to_string()).collect(),
            rows: Vec::new(),
            declared: None,
        }
    }

    pub fn pitch(mut self, x: f64, y: f64) -> Self {
        self.pitch = (x, y);
        self
    }

    pub fn declared(mut self, n: usize) -> Self {
        self.declared = Some(n);
        self
    }

    pub fn row(mut self, values: &[&str]) -> Self {
        self.rows.push(values.iter().map(|v| v.to_string()).collect());
        self
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("FileVersion 1 2;\n");
        out.push_str("FileTimestamp 03-15-21 14:22:10;\n");
        out.push_str("InspectionStationID \"KLA\" \"2132\" \"ID01\";\n");
        out.push_str("SampleType WAFER;\n");
        out.push_str("ResultTimestamp 03-15-21 14:20:00;\n");
        out.push_str("LotID \"LOT001\";\n");
        out.push_str(&format!("SampleSize 1 {};\n", self.size_mm));
        out.push_str("SetupID \"RECIPE\" 03-15-21 14:00:00;\n");
        out.push_str("StepID \"ETCH\";\n");
        out.push_str("SampleOrientationMarkType NOTCH;\n");
        out.push_str("OrientationMarkLocation DOWN;\n");
        out.push_str(&format!("DiePitch {:e} {:e};\n", self.pitch.0, self.pitch.1));
        out.push_str("DieOrigin 0.0 0.0;\n");
        out.push_str("WaferID \"W01\";\n");
        out.push_str("Slot 1;\n");
        out.push_str(&format!(
            "SampleCenterLocation {:e} {:e};\n",
            self.center.0, self.center.1
        ));
        out.push_str("InspectionTest 1;\n");
        out.push_str(&format!("SampleTestPlan {}", self.plan.len()));
        for (x, y) in &self.plan {
            out.push_str(&format!("\n {x} {y}"));
        }
        out.push_str(";\n");
        out.push_str(&format!(
            "DefectRecordSpec {} {};\n",
            self.fields.len(),
            self.fields.join(" ")
        ));
        out.push_str("DefectList");
        if let Some(n) = self.declared {
            out.push_str(&format!(" {n}"));
        }
        for row in &self.rows {
            out.push_str("\n ");
            out.push_str(&row.join(" "));
        }
        out.push_str(";\n");
        out.push_str("EndOfFile;\n");
        out
    }
}
